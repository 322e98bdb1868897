//! Binary chunks
//!
//! A [`Chunk`] is one segment of a chunked payload, stored as a write-once
//! blob attachment. Every `set` uploads a new blob; the chunk's address
//! moves to that blob once the upload completes.

use crate::StoreContext;
use crate::address::Address;
use crate::cache::Evict;
use crate::writer::{CoalescedWriter, WriteFuture, WriteTarget};
use bytes::Bytes;
use chainstore_client::RecordBackend;
use chainstore_common::{Error, RecordAddress, Result};
use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Produces a chunk payload at upload time; evaluated at most once
pub type Producer = Box<dyn FnOnce() -> Result<Bytes> + Send>;

enum Source {
    Eager(Bytes),
    Deferred(Producer),
}

struct ChunkState {
    address: Option<Address>,
    cached: Option<Bytes>,
    /// Payload waiting for the next upload
    source: Option<Source>,
    len: Option<usize>,
    /// Blob written by the most recent upload
    uploaded: Option<RecordAddress>,
    /// Bumped by every `set` so stale fetches do not repopulate the cache
    generation: u64,
}

/// One binary segment
pub struct Chunk {
    ctx: Arc<StoreContext>,
    state: Arc<Mutex<ChunkState>>,
    writer: Arc<CoalescedWriter>,
}

struct Upload {
    ctx: Arc<StoreContext>,
    state: Arc<Mutex<ChunkState>>,
}

impl WriteTarget for Upload {
    fn write(&self) -> WriteFuture {
        future::ready(self.upload()).boxed()
    }
}

impl Upload {
    fn upload(&self) -> Result<RecordAddress> {
        let source = self.state.lock().source.take();
        let payload = match source {
            Some(Source::Eager(payload)) => payload,
            Some(Source::Deferred(produce)) => produce()?,
            // an earlier upload already carried the latest payload
            None => {
                return self
                    .state
                    .lock()
                    .uploaded
                    .ok_or_else(|| Error::internal("chunk upload without payload"));
            }
        };
        let address = self.ctx.backend().create_blob(&payload)?;
        trace!("Uploaded chunk {} ({} bytes)", address, payload.len());
        self.state.lock().uploaded = Some(address);
        Ok(address)
    }
}

impl Chunk {
    /// Empty chunk; it gets an address with its first `set`
    pub fn new(ctx: Arc<StoreContext>) -> Self {
        Self::with_state(ctx, None)
    }

    /// Chunk over an existing blob, with no payload resident
    pub fn from_address(ctx: Arc<StoreContext>, address: Address) -> Self {
        Self::with_state(ctx, Some(address))
    }

    fn with_state(ctx: Arc<StoreContext>, address: Option<Address>) -> Self {
        let writer = CoalescedWriter::new("chunk", Arc::clone(ctx.executor()));
        Self {
            ctx,
            state: Arc::new(Mutex::new(ChunkState {
                address,
                cached: None,
                source: None,
                len: None,
                uploaded: None,
                generation: 0,
            })),
            writer,
        }
    }

    /// Cache `payload` and schedule its upload
    pub fn set(&self, payload: Bytes) {
        let mut state = self.state.lock();
        state.len = Some(payload.len());
        state.cached = Some(payload.clone());
        self.schedule(&mut state, Source::Eager(payload));
    }

    /// Schedule an upload of `len` bytes produced by `produce` at upload time
    ///
    /// Nothing is cached; the payload is read back from the blob on demand.
    pub fn set_deferred(&self, len: usize, produce: Producer) {
        let mut state = self.state.lock();
        state.len = Some(len);
        state.cached = None;
        self.schedule(&mut state, Source::Deferred(produce));
    }

    fn schedule(&self, state: &mut ChunkState, source: Source) {
        state.source = Some(source);
        state.generation += 1;
        let target = Arc::new(Upload {
            ctx: Arc::clone(&self.ctx),
            state: Arc::clone(&self.state),
        });
        state.address = Some(self.writer.request_write(target));
    }

    /// The payload, from cache or fetched from the backend
    pub fn get(&self) -> Result<Bytes> {
        let (address, generation) = {
            let state = self.state.lock();
            if let Some(cached) = &state.cached {
                return Ok(cached.clone());
            }
            let address = state
                .address
                .clone()
                .ok_or_else(|| Error::internal("chunk has no payload"))?;
            (address, state.generation)
        };

        let resolved = address.resolve()?;
        let payload = self.ctx.backend().read_blob(&resolved)?;
        trace!("Fetched chunk {} ({} bytes)", resolved, payload.len());

        let mut state = self.state.lock();
        if state.generation == generation {
            state.len = Some(payload.len());
            state.cached = Some(payload.clone());
        }
        Ok(payload)
    }

    /// Payload length, fetching the payload if it was never seen
    pub fn len(&self) -> Result<usize> {
        if let Some(len) = self.state.lock().len {
            return Ok(len);
        }
        self.get().map(|payload| payload.len())
    }

    /// Length if known without touching the backend
    pub fn known_len(&self) -> Option<usize> {
        self.state.lock().len
    }

    /// Drop the cached payload; the address is untouched
    pub fn clear(&self) {
        self.state.lock().cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.state.lock().cached.is_some()
    }

    pub fn address(&self) -> Option<Address> {
        self.state.lock().address.clone()
    }

    /// Wait for in-flight uploads
    pub fn flush(&self) -> Result<()> {
        self.writer.wait_idle()
    }

    /// Number of uploads started for this chunk
    pub fn uploads(&self) -> u64 {
        self.writer.writes_issued()
    }
}

impl Evict for Chunk {
    fn evict(&self) {
        self.clear();
    }
}
