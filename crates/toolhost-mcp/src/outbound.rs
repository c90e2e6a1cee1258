// crates/toolhost-mcp/src/outbound.rs
// ============================================================================
// Module: Outbound Writer
// Description: Single task that owns the protocol output stream.
// Purpose: Serialize responses and notifications into whole lines.
// Dependencies: serde, serde_json, tokio
// ============================================================================

//! ## Overview
//! Exactly one task writes to the output stream. Every other component holds
//! a cloneable [`OutboundWriter`] and sends it complete, already-serialized
//! lines, so a response and an interleaved notification can never split each
//! other mid-line.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::JsonRpcNotification;
use crate::protocol::JsonRpcResponse;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Commands accepted by the writer task.
#[derive(Debug)]
enum WriterCommand {
    /// Write one line.
    Line(String),
    /// Flush and stop.
    Close,
}

/// Cloneable handle to the writer task.
#[derive(Debug, Clone)]
pub struct OutboundWriter {
    /// Command channel into the writer task.
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl OutboundWriter {
    /// Serializes and queues one message. Returns false when the writer has
    /// stopped or the message cannot be serialized.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(line) => self.tx.send(WriterCommand::Line(line)).is_ok(),
            Err(err) => {
                tracing::error!(error = %err, "outbound message serialization failed");
                false
            }
        }
    }

    /// Queues a response.
    pub fn respond(&self, response: &JsonRpcResponse) -> bool {
        self.send(response)
    }

    /// Queues a notification.
    pub fn notify(&self, method: &str, params: Value) -> bool {
        self.send(&JsonRpcNotification::new(method, params))
    }

    /// Asks the writer task to flush and stop after queued lines.
    pub fn close(&self) {
        let _ = self.tx.send(WriterCommand::Close);
    }
}

// ============================================================================
// SECTION: Writer Task
// ============================================================================

/// Spawns the writer task over `output`.
pub fn spawn_writer<W>(output: W) -> (OutboundWriter, JoinHandle<std::io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(write_loop(output, rx));
    (
        OutboundWriter {
            tx,
        },
        task,
    )
}

/// Drains commands into `output` until closed.
async fn write_loop<W>(
    mut output: W,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Line(mut line) => {
                line.push('\n');
                output.write_all(line.as_bytes()).await?;
                output.flush().await?;
            }
            WriterCommand::Close => break,
        }
    }
    output.flush().await?;
    output.shutdown().await
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use serde_json::Value;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    use super::spawn_writer;

    #[tokio::test]
    async fn concurrent_senders_produce_whole_lines() {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (writer, task) = spawn_writer(server);
        let mut handles = Vec::new();
        for worker in 0 .. 8 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                for seq in 0 .. 50 {
                    writer.notify("test/tick", json!({"worker": worker, "seq": seq, "pad": "x".repeat(512)}));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        writer.close();
        task.await.unwrap().unwrap();

        let mut text = String::new();
        let mut client = client;
        client.read_to_string(&mut text).await.unwrap();
        let lines: Vec<Value> =
            text.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|line| line["method"] == "test/tick"));
    }
}
