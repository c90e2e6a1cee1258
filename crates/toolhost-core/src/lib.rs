// crates/toolhost-core/src/lib.rs
// ============================================================================
// Module: Toolhost Core
// Description: Shared tool contract, canonical hashing, and clock seams.
// Purpose: Single definition of the tool wire contract for host and plugins.
// Dependencies: serde, serde_jcs, sha2, async-trait, tokio-util
// ============================================================================

//! ## Overview
//! `toolhost-core` defines the contract every tool satisfies, whether it runs
//! in-process or behind a plugin process boundary. The JSON shapes of
//! [`ToolDescriptor`] and [`ToolResult`] are the canonical wire contract; the
//! host and each plugin agree on them instead of on in-memory type identity.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod clock;
pub mod hashing;
pub mod tool;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::sha256_hex;
pub use tool::ContentBlock;
pub use tool::NoopProgress;
pub use tool::ProgressSink;
pub use tool::ProgressUpdate;
pub use tool::SharedTool;
pub use tool::ToolDescriptor;
pub use tool::ToolFault;
pub use tool::ToolInstance;
pub use tool::ToolResult;
