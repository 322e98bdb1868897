//! Chunked payloads
//!
//! A [`ChunkedStore`] splits a payload into `segment_size` blobs and lists
//! their addresses in a manifest. Mutations return once the uploads and the
//! manifest write are scheduled; [`ChunkedStore::address`] resolves when the
//! latest manifest write lands.

use crate::StoreContext;
use crate::address::Address;
use crate::cache::FifoCache;
use crate::chunk::Chunk;
use crate::manifest::{self, ManifestLayout, ManifestPage};
use crate::writer::{CoalescedWriter, ErrorSink, WriteFuture, WriteTarget};
use bytes::{Bytes, BytesMut};
use chainstore_common::{Error, PayloadKind, RecordAddress, Result};
use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Appending a store with more chunks than this links its chunks instead of
/// copying its bytes
pub const SPLICE_THRESHOLD: usize = 2;

struct StoreState {
    chunks: Vec<Arc<Chunk>>,
    pages: Vec<ManifestPage>,
    /// Record the first manifest write takes over as its root page
    home: Option<Address>,
    /// Root of the latest scheduled write, or of the last load
    handle: Option<Address>,
}

/// Writes the manifest for the current chunk list
struct ManifestWrite {
    ctx: Arc<StoreContext>,
    layout: ManifestLayout,
    state: Arc<Mutex<StoreState>>,
}

impl WriteTarget for ManifestWrite {
    fn write(&self) -> WriteFuture {
        let snapshot = {
            let state = self.state.lock();
            state
                .chunks
                .iter()
                .map(|chunk| {
                    chunk
                        .address()
                        .ok_or_else(|| Error::internal("chunk without address in manifest"))
                })
                .collect::<Result<Vec<_>>>()
                .map(|pending| (pending, state.pages.clone(), state.home.clone()))
        };
        let ctx = Arc::clone(&self.ctx);
        let layout = self.layout;
        let state = Arc::clone(&self.state);

        async move {
            let (pending, mut existing, home) = snapshot?;
            if existing.is_empty()
                && let Some(home) = home
                && let Some(address) = home.wait_reusable().await
            {
                existing.push(ManifestPage::placeholder(address));
            }
            let addresses = future::try_join_all(pending.iter().map(Address::wait)).await?;
            let outcome = manifest::persist(
                ctx.backend().as_ref(),
                layout,
                &addresses,
                &existing,
                ctx.config().page_limit,
            )?;

            let mut state = state.lock();
            state.pages = outcome.pages;
            state.home = None;
            Ok(outcome.root)
        }
        .boxed()
    }
}

/// Payload stored as a list of blob chunks behind a manifest
pub struct ChunkedStore {
    ctx: Arc<StoreContext>,
    kind: PayloadKind,
    state: Arc<Mutex<StoreState>>,
    writer: Arc<CoalescedWriter>,
    cache: FifoCache<Chunk>,
    /// Serializes mutations that read existing chunks
    mutation: Mutex<()>,
}

impl ChunkedStore {
    fn empty(ctx: Arc<StoreContext>, kind: PayloadKind) -> Self {
        let writer = CoalescedWriter::new("manifest", Arc::clone(ctx.executor()));
        let cache = FifoCache::new(ctx.config().cache_limit);
        Self {
            ctx,
            kind,
            state: Arc::new(Mutex::new(StoreState {
                chunks: Vec::new(),
                pages: Vec::new(),
                home: None,
                handle: None,
            })),
            writer,
            cache,
            mutation: Mutex::new(()),
        }
    }

    /// Split `payload` into chunks and schedule all writes
    pub fn new(ctx: Arc<StoreContext>, kind: PayloadKind, payload: Bytes) -> Self {
        Self::create(ctx, kind, payload, None)
    }

    /// Like [`ChunkedStore::new`], writing the manifest root over the record
    /// at `home` so the payload keeps that address
    pub fn replacing(ctx: Arc<StoreContext>, kind: PayloadKind, payload: Bytes, home: Address) -> Self {
        Self::create(ctx, kind, payload, Some(home))
    }

    fn create(
        ctx: Arc<StoreContext>,
        kind: PayloadKind,
        payload: Bytes,
        home: Option<Address>,
    ) -> Self {
        let store = Self::empty(ctx, kind);
        store.state.lock().home = home;
        let chunks = store.make_chunks(store.segments(&payload));
        info!(
            "Creating chunked {} payload ({} bytes, {} chunks)",
            kind.name(),
            payload.len(),
            chunks.len()
        );
        store.state.lock().chunks = chunks;
        store.schedule_manifest();
        store
    }

    /// Open the payload whose manifest root is `root`
    pub fn load(ctx: Arc<StoreContext>, kind: PayloadKind, root: RecordAddress) -> Result<Self> {
        let store = Self::empty(ctx, kind);
        store.load_root(root)?;
        Ok(store)
    }

    /// Discard in-process state and load the payload at `root`
    pub fn reload(&self, root: RecordAddress) -> Result<()> {
        let _guard = self.mutation.lock();
        if let Err(e) = self.writer.wait_idle() {
            warn!("Discarding chunked payload after failed write: {}", e);
        }
        self.load_root(root)
    }

    fn load_root(&self, root: RecordAddress) -> Result<()> {
        let (entries, pages) =
            manifest::traverse(self.ctx.backend().as_ref(), self.layout(), root)?;
        let chunks = entries
            .into_iter()
            .map(|address| {
                Arc::new(Chunk::from_address(
                    Arc::clone(&self.ctx),
                    Address::resolved(address),
                ))
            })
            .collect::<Vec<_>>();
        debug!("Loaded chunked payload {} ({} chunks)", root, chunks.len());

        self.cache.clear();
        let mut state = self.state.lock();
        state.chunks = chunks;
        state.pages = pages;
        state.home = None;
        state.handle = Some(Address::resolved(root));
        Ok(())
    }

    const fn layout(&self) -> ManifestLayout {
        ManifestLayout::chunked(self.kind)
    }

    pub const fn kind(&self) -> PayloadKind {
        self.kind
    }

    fn segments(&self, payload: &Bytes) -> Vec<Bytes> {
        let size = self.ctx.config().segment_size;
        (0..payload.len())
            .step_by(size)
            .map(|start| payload.slice(start..payload.len().min(start + size)))
            .collect()
    }

    /// Chunks for new segments: the first `cache_limit` stay resident, the
    /// rest are produced at upload time and not kept
    fn make_chunks(&self, segments: Vec<Bytes>) -> Vec<Arc<Chunk>> {
        let resident = self.ctx.config().cache_limit.unwrap_or(usize::MAX);
        segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| {
                let chunk = Arc::new(Chunk::new(Arc::clone(&self.ctx)));
                if i < resident {
                    chunk.set(segment);
                    self.cache.admit(&chunk);
                } else {
                    chunk.set_deferred(segment.len(), Box::new(move || Ok(segment)));
                }
                chunk
            })
            .collect()
    }

    fn schedule_manifest(&self) {
        let target = Arc::new(ManifestWrite {
            ctx: Arc::clone(&self.ctx),
            layout: self.layout(),
            state: Arc::clone(&self.state),
        });
        let handle = self.writer.request_write(target);
        self.state.lock().handle = Some(handle);
    }

    /// Replace the whole payload; existing manifest pages are reused
    pub fn set(&self, payload: Bytes) {
        let _guard = self.mutation.lock();
        self.cache.clear();
        let chunks = self.make_chunks(self.segments(&payload));
        debug!("Replacing chunked payload ({} chunks)", chunks.len());
        self.state.lock().chunks = chunks;
        self.schedule_manifest();
    }

    /// Append `payload`
    ///
    /// With `change_last` the final chunk is first topped up to
    /// `segment_size`, which rewrites that chunk's blob.
    pub fn append(&self, payload: Bytes, change_last: bool) -> Result<()> {
        let _guard = self.mutation.lock();
        let mut rest = payload;
        let segment_size = self.ctx.config().segment_size;

        let last = self.state.lock().chunks.last().cloned();
        if change_last
            && let Some(last) = last
            && last.len()? < segment_size
        {
            let current = last.get()?;
            let take = (segment_size - current.len()).min(rest.len());
            let mut merged = BytesMut::with_capacity(current.len() + take);
            merged.extend_from_slice(&current);
            merged.extend_from_slice(&rest[..take]);
            last.set(merged.freeze());
            self.cache.admit(&last);
            rest = rest.slice(take..);
        }

        let chunks = self.make_chunks(self.segments(&rest));
        debug!("Appending {} bytes in {} new chunks", rest.len(), chunks.len());
        self.state.lock().chunks.extend(chunks);
        self.schedule_manifest();
        Ok(())
    }

    /// Append another chunked payload
    ///
    /// Large payloads are spliced by address without copying; small ones
    /// are appended by value so they can top up the last chunk.
    pub fn append_store(&self, other: &Self) -> Result<()> {
        let theirs = other.state.lock().chunks.clone();
        if theirs.len() <= SPLICE_THRESHOLD {
            return self.append(other.read()?, true);
        }

        let _guard = self.mutation.lock();
        let spliced = theirs
            .iter()
            .map(|chunk| {
                chunk
                    .address()
                    .map(|address| Arc::new(Chunk::from_address(Arc::clone(&self.ctx), address)))
                    .ok_or_else(|| Error::internal("chunk without address"))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Splicing {} chunks", spliced.len());
        self.state.lock().chunks.extend(spliced);
        self.schedule_manifest();
        Ok(())
    }

    /// Append everything `reader` yields, one segment at a time
    ///
    /// With `change_last` only enough bytes to fill the final chunk go into
    /// it; every chunk after that is a full segment except the last.
    /// Returns the number of bytes read.
    pub fn append_reader<R: Read>(&self, mut reader: R, change_last: bool) -> Result<u64> {
        let segment_size = self.ctx.config().segment_size;
        let read = |reader: &mut R, size: usize| {
            read_segment(reader, size).map_err(|e| Error::BackendRead(format!("reader failed: {e}")))
        };
        let mut total = 0u64;

        let last = self.state.lock().chunks.last().cloned();
        if change_last && let Some(last) = last {
            let room = segment_size.saturating_sub(last.len()?);
            if room > 0 {
                let top_up = read(&mut reader, room)?;
                total += top_up.len() as u64;
                let exhausted = top_up.len() < room;
                if !top_up.is_empty() {
                    self.append(top_up, true)?;
                }
                if exhausted {
                    return Ok(total);
                }
            }
        }

        // bound memory: wait for the previous non-resident upload before
        // reading the next segment
        let mut in_flight: Option<Arc<Chunk>> = None;
        let mut added = 0usize;
        loop {
            let segment = read(&mut reader, segment_size)?;
            if segment.is_empty() {
                break;
            }
            total += segment.len() as u64;
            added += 1;

            let _guard = self.mutation.lock();
            let chunk = Arc::new(Chunk::new(Arc::clone(&self.ctx)));
            if self.cache.has_room_for(1) {
                chunk.set(segment);
                self.cache.admit(&chunk);
            } else {
                if let Some(previous) = in_flight.take() {
                    previous.flush()?;
                }
                chunk.set_deferred(segment.len(), Box::new(move || Ok(segment)));
                in_flight = Some(Arc::clone(&chunk));
            }
            self.state.lock().chunks.push(chunk);
        }

        if added > 0 {
            debug!("Appended {} bytes from reader in {} new chunks", total, added);
            self.schedule_manifest();
        }
        Ok(total)
    }

    /// Chunks overlapping `range`, each with its starting offset
    ///
    /// Also returns how far into the payload the walk reached. Chunks whose
    /// length was never seen are fetched to find their extent.
    fn covering(
        &self,
        chunks: &[Arc<Chunk>],
        range: &Range<usize>,
    ) -> Result<(Vec<(usize, Arc<Chunk>)>, usize)> {
        let mut start = 0;
        let mut covering = Vec::new();
        for chunk in chunks {
            if start >= range.end {
                break;
            }
            let len = match chunk.known_len() {
                Some(len) => len,
                None => self.fetch(chunk)?.len(),
            };
            if len > 0 && start + len > range.start {
                covering.push((start, Arc::clone(chunk)));
            }
            start += len;
        }
        Ok((covering, start))
    }

    /// `len` bytes starting at `offset`, fetching only the chunks that
    /// cover them
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(len);
        let chunks = self.state.lock().chunks.clone();
        let (covering, reached) = self.covering(&chunks, &(offset..end))?;
        if reached < end {
            return Err(Error::IndexOutOfRange {
                index: end,
                len: reached,
            });
        }

        let mut out = BytesMut::with_capacity(len);
        for (start, chunk) in &covering {
            let payload = self.fetch(chunk)?;
            let from = offset.saturating_sub(*start);
            let to = (end - start).min(payload.len());
            if covering.len() == 1 {
                return Ok(payload.slice(from..to));
            }
            out.extend_from_slice(&payload[from..to]);
        }
        Ok(out.freeze())
    }

    /// Overwrite bytes starting at `offset`
    ///
    /// Only the touched chunks are re-uploaded; the manifest is rewritten
    /// to point at them. The payload length does not change.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let _guard = self.mutation.lock();
        let end = offset.saturating_add(data.len());
        let chunks = self.state.lock().chunks.clone();
        let (covering, reached) = self.covering(&chunks, &(offset..end))?;
        if reached < end {
            return Err(Error::IndexOutOfRange {
                index: end,
                len: reached,
            });
        }

        for (start, chunk) in &covering {
            let current = self.fetch(chunk)?;
            let from = offset.saturating_sub(*start);
            let to = (end - start).min(current.len());
            let source = start + from - offset;
            let mut patched = BytesMut::from(&current[..]);
            patched[from..to].copy_from_slice(&data[source..source + (to - from)]);
            chunk.set(patched.freeze());
            self.cache.admit(chunk);
        }
        debug!(
            "Rewrote {} bytes at offset {} ({} chunks)",
            data.len(),
            offset,
            covering.len()
        );
        self.schedule_manifest();
        Ok(())
    }

    /// Fetch `chunk`, keeping it resident under the cache bound
    fn fetch(&self, chunk: &Arc<Chunk>) -> Result<Bytes> {
        let payload = chunk.get()?;
        self.cache.admit(chunk);
        Ok(payload)
    }

    fn chunk_at(&self, index: usize) -> Result<Arc<Chunk>> {
        let state = self.state.lock();
        state
            .chunks
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: state.chunks.len(),
            })
    }

    /// Whole payload
    pub fn read(&self) -> Result<Bytes> {
        let chunks = self.state.lock().chunks.clone();
        self.concat(&chunks)
    }

    /// Payload of one chunk
    pub fn read_chunk(&self, index: usize) -> Result<Bytes> {
        let chunk = self.chunk_at(index)?;
        self.fetch(&chunk)
    }

    /// Concatenated payload of a range of chunks
    pub fn read_range(&self, range: Range<usize>) -> Result<Bytes> {
        let chunks = self.state.lock().chunks.clone();
        let len = chunks.len();
        let selected = chunks.get(range.clone()).ok_or(Error::IndexOutOfRange {
            index: range.end,
            len,
        })?;
        self.concat(selected)
    }

    fn concat(&self, chunks: &[Arc<Chunk>]) -> Result<Bytes> {
        if let [single] = chunks {
            return self.fetch(single);
        }
        let mut out = BytesMut::new();
        for chunk in chunks {
            out.extend_from_slice(&self.fetch(chunk)?);
        }
        Ok(out.freeze())
    }

    /// Stream the payload into `writer` chunk by chunk
    ///
    /// Returns the number of bytes written.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<u64> {
        let chunks = self.state.lock().chunks.clone();
        let mut written = 0u64;
        for chunk in &chunks {
            let payload = self.fetch(chunk)?;
            writer
                .write_all(&payload)
                .map_err(|e| Error::internal(format!("save failed: {e}")))?;
            written += payload.len() as u64;
        }
        writer
            .flush()
            .map_err(|e| Error::internal(format!("save failed: {e}")))?;
        Ok(written)
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Payload length; may fetch chunks whose length was never seen
    pub fn len(&self) -> Result<usize> {
        let chunks = self.state.lock().chunks.clone();
        let mut total = 0;
        for chunk in &chunks {
            total += match chunk.known_len() {
                Some(len) => len,
                None => self.fetch(chunk)?.len(),
            };
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Root address of the latest scheduled manifest write
    ///
    /// Resolving it waits for that write and every upload it lists.
    pub fn address(&self) -> Address {
        self.state
            .lock()
            .handle
            .clone()
            .unwrap_or_else(|| Address::failed(Error::internal("chunked payload was never written")))
    }

    /// Manifest pages as of the last completed write or load
    pub fn pages(&self) -> Vec<ManifestPage> {
        self.state.lock().pages.clone()
    }

    /// Number of chunks currently holding their payload in memory
    pub fn resident_chunks(&self) -> usize {
        self.state
            .lock()
            .chunks
            .iter()
            .filter(|chunk| chunk.is_cached())
            .count()
    }

    /// Number of manifest writes started
    pub fn manifest_writes(&self) -> u64 {
        self.writer.writes_issued()
    }

    /// Wait for every chunk upload and the manifest write
    pub fn flush(&self) -> Result<()> {
        let chunks = self.state.lock().chunks.clone();
        let mut first_error = None;
        for chunk in &chunks {
            if let Err(e) = chunk.flush() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.writer.wait_idle() {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Route manifest write failures to `sink`
    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.writer.set_error_sink(sink);
    }
}

fn read_segment<R: Read>(reader: &mut R, size: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(size);
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf.freeze())
}
