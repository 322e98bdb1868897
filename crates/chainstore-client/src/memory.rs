//! In-process channel
//!
//! [`MemoryChannel`] keeps records in hash maps. It enforces the text limit
//! like a real backend would and counts every write, which is what the
//! engine's tests assert coalescing and page reuse against.

use crate::backend::ChannelClient;
use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Snapshot of a channel's write and read counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub text_creates: u64,
    pub text_edits: u64,
    /// Edits whose content matched the stored content
    pub edits_skipped: u64,
    pub blob_creates: u64,
    pub reads: u64,
}

#[derive(Default)]
struct Records {
    texts: HashMap<u64, String>,
    blobs: HashMap<u64, Bytes>,
    next_id: u64,
}

impl Records {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Counters {
    text_creates: AtomicU64,
    text_edits: AtomicU64,
    edits_skipped: AtomicU64,
    blob_creates: AtomicU64,
    reads: AtomicU64,
}

/// In-memory backend channel
pub struct MemoryChannel {
    records: Mutex<Records>,
    text_limit: usize,
    latency: Option<Duration>,
    fail_writes: AtomicBool,
    counters: Counters,
}

impl MemoryChannel {
    /// Create a channel accepting text records up to `text_limit` bytes
    #[must_use]
    pub fn new(text_limit: usize) -> Self {
        Self {
            records: Mutex::new(Records::default()),
            text_limit,
            latency: None,
            fail_writes: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Sleep for `latency` before every write, to widen race windows
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent create and edit fail with `Rejected`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current counters
    pub fn stats(&self) -> ChannelStats {
        let c = &self.counters;
        ChannelStats {
            text_creates: c.text_creates.load(Ordering::Relaxed),
            text_edits: c.text_edits.load(Ordering::Relaxed),
            edits_skipped: c.edits_skipped.load(Ordering::Relaxed),
            blob_creates: c.blob_creates.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
        }
    }

    /// Number of records of either kind
    pub fn record_count(&self) -> usize {
        let records = self.records.lock();
        records.texts.len() + records.blobs.len()
    }

    fn before_write(&self, text: Option<&str>) -> ClientResult<()> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected("writes disabled".to_string()));
        }
        if let Some(text) = text
            && text.len() > self.text_limit
        {
            return Err(ClientError::TooLarge {
                size: text.len(),
                limit: self.text_limit,
            });
        }
        Ok(())
    }
}

impl ChannelClient for MemoryChannel {
    fn create_text(&self, content: &str) -> ClientResult<u64> {
        self.before_write(Some(content))?;
        let mut records = self.records.lock();
        let id = records.allocate();
        records.texts.insert(id, content.to_string());
        self.counters.text_creates.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn edit_text(&self, id: u64, content: &str) -> ClientResult<()> {
        self.before_write(Some(content))?;
        let mut records = self.records.lock();
        if records.blobs.contains_key(&id) {
            return Err(ClientError::NotText(id));
        }
        let current = records.texts.get_mut(&id).ok_or(ClientError::NotFound(id))?;
        if current == content {
            self.counters.edits_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        content.clone_into(current);
        self.counters.text_edits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_text(&self, id: u64) -> ClientResult<String> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let records = self.records.lock();
        if let Some(text) = records.texts.get(&id) {
            return Ok(text.clone());
        }
        if records.blobs.contains_key(&id) {
            return Err(ClientError::NotText(id));
        }
        Err(ClientError::NotFound(id))
    }

    fn create_blob(&self, payload: &[u8]) -> ClientResult<u64> {
        self.before_write(None)?;
        let mut records = self.records.lock();
        let id = records.allocate();
        records.blobs.insert(id, Bytes::copy_from_slice(payload));
        self.counters.blob_creates.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn read_blob(&self, id: u64) -> ClientResult<Bytes> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let records = self.records.lock();
        if let Some(blob) = records.blobs.get(&id) {
            return Ok(blob.clone());
        }
        if records.texts.contains_key(&id) {
            return Err(ClientError::NotABlob(id));
        }
        Err(ClientError::NotFound(id))
    }

    fn text_limit(&self) -> usize {
        self.text_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_create_edit_read() {
        let channel = MemoryChannel::new(16);
        let id = channel.create_text("hello").unwrap();
        channel.edit_text(id, "world").unwrap();
        assert_eq!(channel.read_text(id).unwrap(), "world");

        let stats = channel.stats();
        assert_eq!(stats.text_creates, 1);
        assert_eq!(stats.text_edits, 1);
    }

    #[test]
    fn test_identical_edit_is_noop() {
        let channel = MemoryChannel::new(16);
        let id = channel.create_text("same").unwrap();
        channel.edit_text(id, "same").unwrap();
        let stats = channel.stats();
        assert_eq!(stats.text_edits, 0);
        assert_eq!(stats.edits_skipped, 1);
    }

    #[test]
    fn test_text_limit() {
        let channel = MemoryChannel::new(4);
        assert_eq!(
            channel.create_text("12345"),
            Err(ClientError::TooLarge { size: 5, limit: 4 })
        );
        let id = channel.create_text("1234").unwrap();
        assert!(channel.edit_text(id, "12345").is_err());
        assert_eq!(channel.read_text(id).unwrap(), "1234");
    }

    #[test]
    fn test_blob_roundtrip_and_kind_errors() {
        let channel = MemoryChannel::new(4);
        let blob = channel.create_blob(&[0u8; 64]).unwrap();
        let text = channel.create_text("t").unwrap();
        assert_eq!(channel.read_blob(blob).unwrap().len(), 64);
        assert_eq!(channel.read_blob(text), Err(ClientError::NotABlob(text)));
        assert_eq!(channel.read_text(blob), Err(ClientError::NotText(blob)));
        assert_eq!(channel.read_text(99), Err(ClientError::NotFound(99)));
        assert_eq!(channel.record_count(), 2);
    }

    #[test]
    fn test_fail_writes() {
        let channel = MemoryChannel::new(16);
        channel.set_fail_writes(true);
        assert!(matches!(
            channel.create_blob(b"x"),
            Err(ClientError::Rejected(_))
        ));
        channel.set_fail_writes(false);
        assert!(channel.create_blob(b"x").is_ok());
    }
}
