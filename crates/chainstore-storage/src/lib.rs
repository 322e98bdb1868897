//! Chainstore Storage Engine - Paged and chunked records
//!
//! This crate implements the storage engine on top of a [`RecordBackend`]:
//! - Pending addresses resolved by background work
//! - Single-flight coalesced write-back per entity
//! - Binary chunks with bounded residency
//! - Linked manifest pages listing chunk addresses
//! - Inline records and the size-adaptive switch between inline and chunked

pub mod adaptive;
pub mod address;
pub mod cache;
pub mod chunk;
pub mod chunked;
pub mod codec;
pub mod executor;
pub mod inline;
pub mod manifest;
pub mod writer;

// Re-exports
pub use adaptive::AdaptiveStore;
pub use address::{Address, Resolver};
pub use cache::{CacheStats, Evict, FifoCache, LruCache};
pub use chunk::Chunk;
pub use chunked::{ChunkedStore, SPLICE_THRESHOLD};
pub use executor::WorkerPool;
pub use inline::InlineStore;
pub use manifest::{ManifestLayout, ManifestPage, PersistOutcome};
pub use writer::{CoalescedWriter, ErrorSink, WriteFuture, WriteTarget};

use chainstore_client::{ChannelClient, ClientPool, MemoryChannel, RecordBackend};
use chainstore_common::{Error, Result, StoreConfig};
use std::sync::Arc;
use tracing::info;

/// Everything a store needs: backend, worker pool and tunables
pub struct StoreContext {
    backend: Arc<dyn RecordBackend>,
    executor: Arc<WorkerPool>,
    config: StoreConfig,
}

impl StoreContext {
    /// Validate `config` against `backend` and start the worker pool
    pub fn new(backend: Arc<dyn RecordBackend>, config: StoreConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let limit = backend.page_limit();
        if config.page_limit > limit {
            return Err(Error::configuration(format!(
                "page_limit {} exceeds the backend text limit {limit}",
                config.page_limit
            )));
        }
        let executor = Arc::new(WorkerPool::new(config.workers)?);
        info!(
            "Store context ready (page_limit={}, segment_size={}, workers={})",
            config.page_limit, config.segment_size, config.workers
        );
        Ok(Arc::new(Self {
            backend,
            executor,
            config,
        }))
    }

    /// Context over a single in-process channel
    pub fn in_memory(config: StoreConfig) -> Result<Arc<Self>> {
        let pool = ClientPool::new();
        pool.add_pool(vec![
            Arc::new(MemoryChannel::new(config.page_limit)) as Arc<dyn ChannelClient>,
        ]);
        Self::new(Arc::new(pool), config)
    }

    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    pub const fn executor(&self) -> &Arc<WorkerPool> {
        &self.executor
    }

    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Context over one memory channel, returning the channel for stats
    pub fn context(config: StoreConfig) -> (Arc<StoreContext>, Arc<MemoryChannel>) {
        let channel = Arc::new(MemoryChannel::new(config.page_limit));
        let pool = ClientPool::new();
        pool.add_pool(vec![Arc::clone(&channel) as Arc<dyn ChannelClient>]);
        let ctx = StoreContext::new(Arc::new(pool), config).unwrap();
        (ctx, channel)
    }

    /// Small pages and segments so tests exercise chaining
    pub fn small_config() -> StoreConfig {
        StoreConfig {
            page_limit: 200,
            segment_size: 64,
            upper_threshold: 200,
            lower_threshold: 150,
            workers: 4,
            ..StoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rejects_page_limit_over_backend() {
        let pool = ClientPool::new();
        pool.add_pool(vec![Arc::new(MemoryChannel::new(1000)) as Arc<dyn ChannelClient>]);
        let result = StoreContext::new(Arc::new(pool), StoreConfig::default());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_in_memory_context() {
        let ctx = StoreContext::in_memory(StoreConfig::default()).unwrap();
        assert_eq!(ctx.backend().page_limit(), 3950);
        assert_eq!(ctx.executor().workers(), 8);
    }
}
