//! Size-adaptive payloads
//!
//! An [`AdaptiveStore`] keeps small payloads inline and large ones chunked.
//! Sizes are measured as the length the inline record would have. The
//! switch has hysteresis: inline becomes chunked only above
//! `upper_threshold`, chunked becomes inline only below `lower_threshold`.

use crate::StoreContext;
use crate::address::Address;
use crate::chunked::ChunkedStore;
use crate::codec::{decode_body, encode_body, encoded_body_len};
use crate::inline::InlineStore;
use crate::writer::ErrorSink;
use bytes::{Bytes, BytesMut};
use chainstore_client::RecordBackend;
use chainstore_common::{Discriminator, Error, PayloadKind, RecordAddress, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
enum Backing {
    /// Inline record and its decoded payload
    Inline(Arc<InlineStore>, Bytes),
    Chunked(Arc<ChunkedStore>),
}

struct AdaptiveState {
    backing: Backing,
    sink: Option<ErrorSink>,
}

/// Payload that migrates between inline and chunked storage
///
/// Migrations write the new representation over the old root record, so
/// the payload keeps one address for its whole life.
pub struct AdaptiveStore {
    ctx: Arc<StoreContext>,
    kind: PayloadKind,
    state: Mutex<AdaptiveState>,
    mutation: Mutex<()>,
}

/// Length of the inline record for a payload of `len` bytes
pub const fn inline_len(kind: PayloadKind, len: usize) -> usize {
    Discriminator::Inline(kind).as_str().len() + encoded_body_len(kind, len)
}

impl AdaptiveStore {
    fn with_backing(ctx: Arc<StoreContext>, kind: PayloadKind, backing: Backing) -> Self {
        Self {
            ctx,
            kind,
            state: Mutex::new(AdaptiveState {
                backing,
                sink: None,
            }),
            mutation: Mutex::new(()),
        }
    }

    /// Store `payload`, inline if it fits under `upper_threshold`
    pub fn new(ctx: Arc<StoreContext>, kind: PayloadKind, payload: Bytes) -> Result<Self> {
        Self::create(ctx, kind, payload, None)
    }

    /// Store `payload` over the record at `home`, keeping its address
    pub fn replacing(
        ctx: Arc<StoreContext>,
        kind: PayloadKind,
        payload: Bytes,
        home: Address,
    ) -> Result<Self> {
        Self::create(ctx, kind, payload, Some(home))
    }

    fn create(
        ctx: Arc<StoreContext>,
        kind: PayloadKind,
        payload: Bytes,
        home: Option<Address>,
    ) -> Result<Self> {
        let backing = if inline_len(kind, payload.len()) <= ctx.config().upper_threshold {
            Self::inline(&ctx, kind, payload, home)?
        } else {
            Self::chunked(&ctx, kind, payload, home)
        };
        Ok(Self::with_backing(ctx, kind, backing))
    }

    /// Open the payload at `address`, inline or chunked
    pub fn load(ctx: Arc<StoreContext>, kind: PayloadKind, address: RecordAddress) -> Result<Self> {
        let content = ctx.backend().read_text(&address)?;
        let (tag, body) = Discriminator::parse(&content)?;
        Self::from_record(ctx, kind, address, tag, body)
    }

    /// Open a payload from a record already read by the caller
    pub fn from_record(
        ctx: Arc<StoreContext>,
        kind: PayloadKind,
        address: RecordAddress,
        tag: Discriminator,
        body: &str,
    ) -> Result<Self> {
        let backing = match tag {
            Discriminator::Inline(found) if found == kind => {
                let payload = decode_body(kind, address, body)?;
                let store =
                    InlineStore::from_record(Arc::clone(&ctx), address, tag, body.to_string());
                Backing::Inline(Arc::new(store), payload)
            }
            Discriminator::ChunkedRoot(found) if found == kind => Backing::Chunked(Arc::new(
                ChunkedStore::load(Arc::clone(&ctx), kind, address)?,
            )),
            _ => {
                return Err(Error::DiscriminatorMismatch {
                    address,
                    expected: format!("{} value", kind.name()),
                    found: tag.as_str().to_string(),
                });
            }
        };
        Ok(Self::with_backing(ctx, kind, backing))
    }

    fn inline(
        ctx: &Arc<StoreContext>,
        kind: PayloadKind,
        payload: Bytes,
        home: Option<Address>,
    ) -> Result<Backing> {
        let body = encode_body(kind, &payload)?;
        let tag = Discriminator::Inline(kind);
        let store = match home {
            Some(home) => InlineStore::replacing(Arc::clone(ctx), tag, body, home)?,
            None => InlineStore::new(Arc::clone(ctx), tag, body)?,
        };
        Ok(Backing::Inline(Arc::new(store), payload))
    }

    fn chunked(
        ctx: &Arc<StoreContext>,
        kind: PayloadKind,
        payload: Bytes,
        home: Option<Address>,
    ) -> Backing {
        let store = match home {
            Some(home) => ChunkedStore::replacing(Arc::clone(ctx), kind, payload, home),
            None => ChunkedStore::new(Arc::clone(ctx), kind, payload),
        };
        Backing::Chunked(Arc::new(store))
    }

    pub const fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Replace the payload, migrating if it crosses a threshold
    pub fn set(&self, payload: Bytes) -> Result<()> {
        let _guard = self.mutation.lock();
        self.replace(payload)
    }

    fn replace(&self, payload: Bytes) -> Result<()> {
        let config = self.ctx.config();
        let size = inline_len(self.kind, payload.len());
        let mut state = self.state.lock();

        let backing = match state.backing.clone() {
            Backing::Inline(store, _) if size <= config.upper_threshold => {
                store.set(encode_body(self.kind, &payload)?)?;
                state.backing = Backing::Inline(store, payload);
                return Ok(());
            }
            Backing::Inline(store, _) => {
                info!(
                    "Payload grew to {} bytes, moving inline {} payload to chunks",
                    size,
                    self.kind.name()
                );
                Self::chunked(&self.ctx, self.kind, payload, Some(store.address()))
            }
            Backing::Chunked(store) if size < config.lower_threshold => {
                info!(
                    "Payload shrank to {} bytes, moving chunked {} payload inline",
                    size,
                    self.kind.name()
                );
                Self::inline(&self.ctx, self.kind, payload, Some(store.address()))?
            }
            Backing::Chunked(store) => {
                store.set(payload);
                return Ok(());
            }
        };

        if let Some(sink) = &state.sink {
            apply_sink(&backing, Arc::clone(sink));
        }
        state.backing = backing;
        Ok(())
    }

    /// Append `payload`; see [`ChunkedStore::append`] for `change_last`
    pub fn append(&self, payload: Bytes, change_last: bool) -> Result<()> {
        let _guard = self.mutation.lock();
        let backing = self.state.lock().backing.clone();
        match backing {
            Backing::Inline(_, current) => {
                let mut combined = BytesMut::with_capacity(current.len() + payload.len());
                combined.extend_from_slice(&current);
                combined.extend_from_slice(&payload);
                self.replace(combined.freeze())
            }
            // growing never crosses the lower threshold
            Backing::Chunked(store) => store.append(payload, change_last),
        }
    }

    /// The whole payload
    pub fn get(&self) -> Result<Bytes> {
        let backing = self.state.lock().backing.clone();
        match backing {
            Backing::Inline(_, payload) => Ok(payload),
            Backing::Chunked(store) => store.read(),
        }
    }

    /// Payload length
    pub fn len(&self) -> Result<usize> {
        let backing = self.state.lock().backing.clone();
        match backing {
            Backing::Inline(_, payload) => Ok(payload.len()),
            Backing::Chunked(store) => store.len(),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// `len` bytes starting at `offset`
    ///
    /// Chunked payloads fetch only the chunks covering the range.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Bytes> {
        let backing = self.state.lock().backing.clone();
        match backing {
            Backing::Inline(_, payload) => {
                let end = offset.saturating_add(len);
                if end > payload.len() {
                    return Err(Error::IndexOutOfRange {
                        index: end,
                        len: payload.len(),
                    });
                }
                Ok(payload.slice(offset..end))
            }
            Backing::Chunked(store) => store.read_at(offset, len),
        }
    }

    /// Overwrite bytes starting at `offset`; the length does not change
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        let _guard = self.mutation.lock();
        let backing = self.state.lock().backing.clone();
        match backing {
            Backing::Inline(_, current) => {
                let end = offset.saturating_add(data.len());
                if end > current.len() {
                    return Err(Error::IndexOutOfRange {
                        index: end,
                        len: current.len(),
                    });
                }
                let mut patched = BytesMut::from(&current[..]);
                patched[offset..end].copy_from_slice(data);
                self.replace(patched.freeze())
            }
            Backing::Chunked(store) => store.write_at(offset, data),
        }
    }

    /// Address of the payload's root record
    pub fn address(&self) -> Address {
        match &self.state.lock().backing {
            Backing::Inline(store, _) => store.address(),
            Backing::Chunked(store) => store.address(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.state.lock().backing, Backing::Chunked(_))
    }

    /// Underlying chunked store, when chunked
    pub fn chunked_store(&self) -> Option<Arc<ChunkedStore>> {
        match &self.state.lock().backing {
            Backing::Chunked(store) => Some(Arc::clone(store)),
            Backing::Inline(..) => None,
        }
    }

    pub fn flush(&self) -> Result<()> {
        let backing = self.state.lock().backing.clone();
        match backing {
            Backing::Inline(store, _) => store.flush(),
            Backing::Chunked(store) => store.flush(),
        }
    }

    /// Route write failures of this payload to `sink`
    pub fn set_error_sink(&self, sink: ErrorSink) {
        let mut state = self.state.lock();
        apply_sink(&state.backing, Arc::clone(&sink));
        state.sink = Some(sink);
    }
}

fn apply_sink(backing: &Backing, sink: ErrorSink) {
    match backing {
        Backing::Inline(store, _) => store.set_error_sink(sink),
        Backing::Chunked(store) => store.set_error_sink(sink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, small_config};

    fn text(len: usize) -> Bytes {
        Bytes::from("t".repeat(len))
    }

    #[test]
    fn test_small_is_inline_large_is_chunked() {
        let (ctx, _) = context(small_config());
        let small = AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Text, text(198)).unwrap();
        assert!(!small.is_chunked());
        let large = AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Text, text(199)).unwrap();
        assert!(large.is_chunked());
        assert_eq!(large.get().unwrap(), text(199));
    }

    #[test]
    fn test_hysteresis() {
        // upper 200, lower 150, text records are 2 + len
        let (ctx, _) = context(small_config());
        let store = AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Text, text(100)).unwrap();
        assert!(!store.is_chunked());

        store.set(text(199)).unwrap();
        assert!(store.is_chunked());

        store.set(text(160)).unwrap();
        assert!(store.is_chunked(), "inside the band stays chunked");

        store.set(text(140)).unwrap();
        assert!(!store.is_chunked());

        store.set(text(170)).unwrap();
        assert!(!store.is_chunked(), "inside the band stays inline");
        assert_eq!(store.get().unwrap(), text(170));
    }

    #[test]
    fn test_append_migrates_and_reloads() {
        let (ctx, _) = context(small_config());
        let store = AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Bytes, Bytes::new()).unwrap();
        let mut expected = Vec::new();
        for i in 0..40u8 {
            let part = vec![i; 9];
            expected.extend_from_slice(&part);
            store.append(Bytes::from(part), true).unwrap();
        }
        assert!(store.is_chunked());
        assert_eq!(&store.get().unwrap()[..], &expected[..]);

        let address = store.address().resolve().unwrap();
        let loaded = AdaptiveStore::load(Arc::clone(&ctx), PayloadKind::Bytes, address).unwrap();
        assert!(loaded.is_chunked());
        assert_eq!(&loaded.get().unwrap()[..], &expected[..]);
        assert_eq!(loaded.len().unwrap(), expected.len());
    }

    #[test]
    fn test_migrations_keep_address() {
        let (ctx, _) = context(small_config());
        let store = AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Text, text(10)).unwrap();
        let home = store.address().resolve().unwrap();

        store.set(text(300)).unwrap();
        assert!(store.is_chunked());
        assert_eq!(store.address().resolve().unwrap(), home);
        let loaded = AdaptiveStore::load(Arc::clone(&ctx), PayloadKind::Text, home).unwrap();
        assert!(loaded.is_chunked());
        assert_eq!(loaded.get().unwrap(), text(300));

        store.set(text(20)).unwrap();
        assert!(!store.is_chunked());
        assert_eq!(store.address().resolve().unwrap(), home);
        assert_eq!(ctx.backend().read_text(&home).unwrap(), format!("ss{}", "t".repeat(20)));
        assert_eq!(
            AdaptiveStore::load(ctx, PayloadKind::Text, home).unwrap().get().unwrap(),
            text(20)
        );
    }

    #[test]
    fn test_offset_access() {
        let (ctx, _) = context(small_config());
        let payload: Vec<u8> = (0..=255).collect();
        let store =
            AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Bytes, Bytes::from(payload.clone()))
                .unwrap();
        assert!(store.is_chunked());
        assert_eq!(&store.read_at(60, 10).unwrap()[..], &payload[60..70]);

        store.write_at(62, b"xyz").unwrap();
        let mut expected = payload.clone();
        expected[62..65].copy_from_slice(b"xyz");
        let address = store.address().resolve().unwrap();
        let loaded = AdaptiveStore::load(Arc::clone(&ctx), PayloadKind::Bytes, address).unwrap();
        assert_eq!(&loaded.get().unwrap()[..], &expected[..]);

        let small = AdaptiveStore::new(ctx, PayloadKind::Bytes, Bytes::from_static(b"abcdef")).unwrap();
        small.write_at(1, b"BC").unwrap();
        assert_eq!(&small.read_at(0, 4).unwrap()[..], b"aBCd");
        assert!(small.read_at(4, 3).is_err());
        assert!(small.write_at(5, b"zz").is_err());
    }

    #[test]
    fn test_load_kind_mismatch() {
        let (ctx, _) = context(small_config());
        let store = AdaptiveStore::new(Arc::clone(&ctx), PayloadKind::Text, text(5)).unwrap();
        let address = store.address().resolve().unwrap();
        let err = AdaptiveStore::load(ctx, PayloadKind::Bytes, address).err().unwrap();
        assert!(matches!(err, Error::DiscriminatorMismatch { .. }));
    }

    #[test]
    fn test_invalid_utf8_text_rejected() {
        let (ctx, _) = context(small_config());
        let result = AdaptiveStore::new(ctx, PayloadKind::Text, Bytes::from_static(&[0xff]));
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }
}
