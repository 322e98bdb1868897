//! Byte, text and opaque values
//!
//! Each wraps an [`AdaptiveStore`] of its payload kind, so small values
//! live in one record and large ones are chunked.

use bytes::Bytes;
use chainstore_common::{Error, PayloadKind, RecordAddress, Result};
use chainstore_storage::{AdaptiveStore, Address, ErrorSink, StoreContext};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Raw bytes
pub struct Blob {
    store: AdaptiveStore,
}

impl Blob {
    pub fn new(ctx: Arc<StoreContext>, payload: impl Into<Bytes>) -> Result<Self> {
        let store = AdaptiveStore::new(ctx, PayloadKind::Bytes, payload.into())?;
        Ok(Self { store })
    }

    pub(crate) fn replacing(ctx: Arc<StoreContext>, payload: Bytes, home: Address) -> Result<Self> {
        let store = AdaptiveStore::replacing(ctx, PayloadKind::Bytes, payload, home)?;
        Ok(Self { store })
    }

    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let store = AdaptiveStore::load(ctx, PayloadKind::Bytes, address)?;
        Ok(Self { store })
    }

    pub(crate) const fn from_store(store: AdaptiveStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<Bytes> {
        self.store.get()
    }

    pub fn set(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.store.set(payload.into())
    }

    /// Append to the end, topping up the last chunk
    pub fn append(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.store.append(payload.into(), true)
    }

    /// `len` bytes from `offset`; large blobs fetch only the chunks needed
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Bytes> {
        self.store.read_at(offset, len)
    }

    /// Overwrite bytes in place from `offset`
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.store.write_at(offset, data)
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    pub const fn store(&self) -> &AdaptiveStore {
        &self.store
    }

    pub fn address(&self) -> Address {
        self.store.address()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.store.set_error_sink(sink);
    }
}

/// UTF-8 text
pub struct Text {
    store: AdaptiveStore,
}

impl Text {
    pub fn new(ctx: Arc<StoreContext>, text: &str) -> Result<Self> {
        let store = AdaptiveStore::new(ctx, PayloadKind::Text, Bytes::copy_from_slice(text.as_bytes()))?;
        Ok(Self { store })
    }

    pub(crate) fn replacing(ctx: Arc<StoreContext>, text: &str, home: Address) -> Result<Self> {
        let payload = Bytes::copy_from_slice(text.as_bytes());
        let store = AdaptiveStore::replacing(ctx, PayloadKind::Text, payload, home)?;
        Ok(Self { store })
    }

    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let store = AdaptiveStore::load(ctx, PayloadKind::Text, address)?;
        Ok(Self { store })
    }

    pub(crate) const fn from_store(store: AdaptiveStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<String> {
        let payload = self.store.get()?;
        String::from_utf8(payload.to_vec())
            .map_err(|e| Error::serialization(format!("text payload is not UTF-8: {e}")))
    }

    pub fn set(&self, text: &str) -> Result<()> {
        self.store.set(Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn push_str(&self, text: &str) -> Result<()> {
        self.store.append(Bytes::copy_from_slice(text.as_bytes()), true)
    }

    /// Length in bytes
    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    pub const fn store(&self) -> &AdaptiveStore {
        &self.store
    }

    pub fn address(&self) -> Address {
        self.store.address()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.store.set_error_sink(sink);
    }
}

/// Caller-serialized payload of a type the store does not know
pub struct Opaque {
    store: AdaptiveStore,
}

impl Opaque {
    pub fn new(ctx: Arc<StoreContext>, payload: impl Into<Bytes>) -> Result<Self> {
        let store = AdaptiveStore::new(ctx, PayloadKind::Opaque, payload.into())?;
        Ok(Self { store })
    }

    /// Serialize `value` with bincode and store it
    pub fn encode<T: Serialize>(ctx: Arc<StoreContext>, value: &T) -> Result<Self> {
        let payload = bincode::serialize(value).map_err(|e| Error::serialization(e.to_string()))?;
        Self::new(ctx, payload)
    }

    pub(crate) fn replacing(ctx: Arc<StoreContext>, payload: Bytes, home: Address) -> Result<Self> {
        let store = AdaptiveStore::replacing(ctx, PayloadKind::Opaque, payload, home)?;
        Ok(Self { store })
    }

    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let store = AdaptiveStore::load(ctx, PayloadKind::Opaque, address)?;
        Ok(Self { store })
    }

    pub(crate) const fn from_store(store: AdaptiveStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<Bytes> {
        self.store.get()
    }

    /// Deserialize the payload written by [`Opaque::encode`]
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self.store.get()?;
        bincode::deserialize(&payload).map_err(|e| Error::serialization(e.to_string()))
    }

    pub fn set(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.store.set(payload.into())
    }

    pub const fn store(&self) -> &AdaptiveStore {
        &self.store
    }

    pub fn address(&self) -> Address {
        self.store.address()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.store.set_error_sink(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use chainstore_client::RecordBackend;
    use rand::RngCore;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[test]
    fn test_blob_grows_into_chunks() {
        let (ctx, _) = context();
        let blob = Blob::new(Arc::clone(&ctx), Bytes::new()).unwrap();
        let mut expected = vec![0u8; 700];
        rand::thread_rng().fill_bytes(&mut expected);
        for part in expected.chunks(70) {
            blob.append(part.to_vec()).unwrap();
        }
        assert!(blob.store().is_chunked());
        assert_eq!(&blob.get().unwrap()[..], &expected[..]);

        let address = blob.address().resolve().unwrap();
        let loaded = Blob::load(ctx, address).unwrap();
        assert_eq!(loaded.len().unwrap(), 700);
    }

    #[test]
    fn test_text_push_str() {
        let (ctx, _) = context();
        let text = Text::new(Arc::clone(&ctx), "héllo").unwrap();
        text.push_str(", wörld").unwrap();
        assert_eq!(text.get().unwrap(), "héllo, wörld");

        let address = text.address().resolve().unwrap();
        assert!(ctx.backend().read_text(&address).unwrap().starts_with("ss"));
        assert_eq!(Text::load(ctx, address).unwrap().get().unwrap(), "héllo, wörld");
    }

    #[test]
    fn test_long_text_splits_multibyte_chars() {
        let (ctx, _) = context();
        // 3-byte chars straddle the 64 byte segment boundary
        let long = "€".repeat(200);
        let text = Text::new(Arc::clone(&ctx), &long).unwrap();
        assert!(text.store().is_chunked());
        let address = text.address().resolve().unwrap();
        assert_eq!(Text::load(ctx, address).unwrap().get().unwrap(), long);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        name: String,
        limits: BTreeMap<String, u32>,
    }

    #[test]
    fn test_opaque_encode_decode() {
        let (ctx, _) = context();
        let settings = Settings {
            name: "primary".into(),
            limits: [("reads".to_string(), 10), ("writes".to_string(), 3)].into(),
        };
        let stored = Opaque::encode(Arc::clone(&ctx), &settings).unwrap();
        let address = stored.address().resolve().unwrap();
        assert!(ctx.backend().read_text(&address).unwrap().starts_with("us"));

        let loaded = Opaque::load(ctx, address).unwrap();
        assert_eq!(loaded.decode::<Settings>().unwrap(), settings);
    }

    #[test]
    fn test_blob_offset_edit() {
        let (ctx, channel) = context();
        let mut expected = vec![0u8; 640];
        rand::thread_rng().fill_bytes(&mut expected);
        let blob = Blob::new(Arc::clone(&ctx), expected.clone()).unwrap();
        blob.flush().unwrap();
        let uploads = channel.stats().blob_creates;

        blob.write_at(300, b"patched").unwrap();
        blob.flush().unwrap();
        assert_eq!(channel.stats().blob_creates - uploads, 1);
        expected[300..307].copy_from_slice(b"patched");
        assert_eq!(&blob.read_at(290, 30).unwrap()[..], &expected[290..320]);

        let address = blob.address().resolve().unwrap();
        assert_eq!(&Blob::load(ctx, address).unwrap().get().unwrap()[..], &expected[..]);
    }

    #[test]
    fn test_kinds_do_not_cross_load() {
        let (ctx, _) = context();
        let blob = Blob::new(Arc::clone(&ctx), vec![1u8, 2, 3]).unwrap();
        let address = blob.address().resolve().unwrap();
        assert!(Text::load(Arc::clone(&ctx), address).is_err());
        assert!(Opaque::load(ctx, address).is_err());
    }
}
