// crates/toolhost-mcp/src/framing.rs
// ============================================================================
// Module: Line Framing
// Description: Bounded reads of newline-delimited messages.
// Purpose: Keep untrusted peers from forcing unbounded buffering.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Both the client-facing engine and plugin connections read one JSON message
//! per line. [`read_bounded_line`] works on raw bytes so a line that is too
//! long, or not valid UTF-8, costs the caller one message and never the
//! stream.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Outcome of one bounded line read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line is in the buffer, without its terminator.
    Line,
    /// The line exceeded the limit and was discarded.
    Oversized,
    /// Input is exhausted.
    Eof,
}

/// Reads one line of at most `limit` bytes into `buffer`. Longer lines are
/// consumed through their newline and reported as oversized, so at most
/// `limit + 1` bytes are ever buffered.
///
/// # Errors
///
/// Returns the underlying I/O error; EOF is [`LineRead::Eof`], not an error.
pub async fn read_bounded_line<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(cap).read_until(b'\n', buffer).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
    }
    if buffer.len() <= limit {
        return Ok(LineRead::Line);
    }
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        if let Some(position) = available.iter().position(|byte| *byte == b'\n') {
            reader.consume(position + 1);
            break;
        }
        let length = available.len();
        reader.consume(length);
    }
    buffer.clear();
    Ok(LineRead::Oversized)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
