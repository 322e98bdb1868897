//! Backend contracts
//!
//! [`RecordBackend`] is what the storage engine talks to. It only offers
//! point operations: there is no listing, no range query and no
//! transaction.

use crate::error::ClientResult;
use bytes::Bytes;
use chainstore_common::{RecordAddress, Result};

/// Record store the engine is built on
///
/// Implementations must be internally synchronized; the engine calls them
/// from many worker threads at once.
pub trait RecordBackend: Send + Sync {
    /// Create a text record. `content` must not exceed [`Self::page_limit`].
    fn create_text(&self, content: &str) -> Result<RecordAddress>;

    /// Replace the content of a text record.
    ///
    /// Writing content identical to the current content is a silent no-op.
    fn edit_text(&self, address: &RecordAddress, content: &str) -> Result<()>;

    /// Read a text record. Fails with `NotFound` for invalid addresses.
    fn read_text(&self, address: &RecordAddress) -> Result<String>;

    /// Create a write-once binary attachment.
    fn create_blob(&self, payload: &[u8]) -> Result<RecordAddress>;

    /// Read a binary attachment. Fails with `NotFound` for invalid addresses.
    fn read_blob(&self, address: &RecordAddress) -> Result<Bytes>;

    /// Largest text record the backend accepts
    fn page_limit(&self) -> usize;
}

/// One backend endpoint (a credential posting into one destination)
///
/// Channels speak native record ids; the pool turns them into
/// [`RecordAddress`]es.
pub trait ChannelClient: Send + Sync {
    fn create_text(&self, content: &str) -> ClientResult<u64>;

    fn edit_text(&self, id: u64, content: &str) -> ClientResult<()>;

    fn read_text(&self, id: u64) -> ClientResult<String>;

    fn create_blob(&self, payload: &[u8]) -> ClientResult<u64>;

    fn read_blob(&self, id: u64) -> ClientResult<Bytes>;

    /// Largest text record this channel accepts
    fn text_limit(&self) -> usize;
}
