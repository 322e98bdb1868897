//! Client pool
//!
//! A pool is a matrix of channels: one row per credential (`pool` index),
//! one column per destination (`channel` index). New records are spread
//! across every channel round-robin; reads and edits go to the channel the
//! record's address names.

use crate::backend::{ChannelClient, RecordBackend};
use crate::error::ClientError;
use bytes::Bytes;
use chainstore_common::{Error, RecordAddress, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Pool of backend channels
pub struct ClientPool {
    rows: RwLock<Vec<Vec<Arc<dyn ChannelClient>>>>,
    /// Flattened `(pool, channel)` order used for round-robin
    order: RwLock<Vec<(u32, u32)>>,
    cursor: AtomicUsize,
}

impl ClientPool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            order: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Add one credential's channels; returns its pool index
    pub fn add_pool(&self, channels: Vec<Arc<dyn ChannelClient>>) -> u32 {
        let mut rows = self.rows.write();
        let pool = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        let mut order = self.order.write();
        for channel in 0..channels.len() {
            order.push((pool, u32::try_from(channel).unwrap_or(u32::MAX)));
        }
        info!("Added client pool {} with {} channels", pool, channels.len());
        rows.push(channels);
        pool
    }

    /// Number of channels across all pools
    pub fn channel_count(&self) -> usize {
        self.order.read().len()
    }

    /// Pick the next channel for a create
    fn next(&self) -> Result<(u32, u32, Arc<dyn ChannelClient>)> {
        let order = self.order.read();
        if order.is_empty() {
            return Err(Error::configuration("client pool has no channels"));
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % order.len();
        let (pool, channel) = order[slot];
        drop(order);
        let client = self
            .channel(pool, channel)
            .ok_or_else(|| Error::internal("round-robin slot without channel"))?;
        Ok((pool, channel, client))
    }

    fn channel(&self, pool: u32, channel: u32) -> Option<Arc<dyn ChannelClient>> {
        self.rows
            .read()
            .get(pool as usize)?
            .get(channel as usize)
            .cloned()
    }

    /// Channel owning `address`
    fn route(&self, address: &RecordAddress) -> Result<Arc<dyn ChannelClient>> {
        self.channel(address.pool, address.channel)
            .ok_or(Error::NotFound(*address))
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a channel error into the engine's taxonomy
fn map_err(err: ClientError, address: Option<RecordAddress>, write: bool) -> Error {
    match (err, address) {
        (ClientError::NotFound(_), Some(address)) => Error::NotFound(address),
        (ClientError::NotABlob(_), Some(address)) => Error::DiscriminatorMismatch {
            address,
            expected: "blob attachment".to_string(),
            found: "text record".to_string(),
        },
        (ClientError::NotText(_), Some(address)) => Error::DiscriminatorMismatch {
            address,
            expected: "text record".to_string(),
            found: "blob attachment".to_string(),
        },
        (ClientError::TooLarge { size, limit }, _) => Error::ContentTooLarge { size, limit },
        (err, _) if write => Error::BackendWrite(err.to_string()),
        (err, _) => Error::BackendRead(err.to_string()),
    }
}

impl RecordBackend for ClientPool {
    fn create_text(&self, content: &str) -> Result<RecordAddress> {
        let (pool, channel, client) = self.next()?;
        let native = client
            .create_text(content)
            .map_err(|e| map_err(e, None, true))?;
        let address = RecordAddress::new(pool, channel, native);
        debug!("Created text record {} ({} bytes)", address, content.len());
        Ok(address)
    }

    fn edit_text(&self, address: &RecordAddress, content: &str) -> Result<()> {
        self.route(address)?
            .edit_text(address.native, content)
            .map_err(|e| map_err(e, Some(*address), true))
    }

    fn read_text(&self, address: &RecordAddress) -> Result<String> {
        self.route(address)?
            .read_text(address.native)
            .map_err(|e| map_err(e, Some(*address), false))
    }

    fn create_blob(&self, payload: &[u8]) -> Result<RecordAddress> {
        let (pool, channel, client) = self.next()?;
        let native = client
            .create_blob(payload)
            .map_err(|e| map_err(e, None, true))?;
        let address = RecordAddress::new(pool, channel, native);
        debug!("Created blob {} ({} bytes)", address, payload.len());
        Ok(address)
    }

    fn read_blob(&self, address: &RecordAddress) -> Result<Bytes> {
        self.route(address)?
            .read_blob(address.native)
            .map_err(|e| map_err(e, Some(*address), false))
    }

    fn page_limit(&self) -> usize {
        self.rows
            .read()
            .iter()
            .flatten()
            .map(|c| c.text_limit())
            .min()
            .unwrap_or(0)
    }
}
