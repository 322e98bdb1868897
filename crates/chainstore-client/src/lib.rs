//! Chainstore Client - Backend record clients
//!
//! This crate defines the backend contract the storage engine consumes and
//! the pieces needed to satisfy it:
//!
//! - [`RecordBackend`]: text records and blob attachments addressed by
//!   [`RecordAddress`](chainstore_common::RecordAddress)
//! - [`ChannelClient`]: one backend endpoint speaking native record ids
//! - [`ClientPool`]: injected pool of channels with round-robin selection
//! - [`MemoryChannel`]: in-process channel for tests and embedding

pub mod backend;
pub mod error;
pub mod memory;
pub mod pool;

// Re-exports
pub use backend::{ChannelClient, RecordBackend};
pub use error::{ClientError, ClientResult};
pub use memory::{ChannelStats, MemoryChannel};
pub use pool::ClientPool;
