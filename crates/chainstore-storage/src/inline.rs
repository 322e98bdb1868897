//! Single-record values
//!
//! An [`InlineStore`] keeps a whole value in one text record: the
//! discriminator followed by the body. The record is created by the first
//! write and edited in place afterwards. A store built with
//! [`InlineStore::replacing`] edits an existing record instead of creating
//! one, so the value keeps that record's address.

use crate::StoreContext;
use crate::address::Address;
use crate::writer::{CoalescedWriter, ErrorSink, WriteFuture, WriteTarget};
use chainstore_client::RecordBackend;
use chainstore_common::{Discriminator, Error, RecordAddress, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;

struct InlineState {
    tag: Discriminator,
    body: String,
    record: Option<RecordAddress>,
    /// Record to take over on the first write
    home: Option<Address>,
    handle: Option<Address>,
}

struct RecordWrite {
    ctx: Arc<StoreContext>,
    state: Arc<Mutex<InlineState>>,
}

impl WriteTarget for RecordWrite {
    fn write(&self) -> WriteFuture {
        let (content, record, home) = {
            let state = self.state.lock();
            (
                format!("{}{}", state.tag.as_str(), state.body),
                state.record,
                state.home.clone(),
            )
        };
        let ctx = Arc::clone(&self.ctx);
        let state = Arc::clone(&self.state);

        async move {
            let record = match (record, home) {
                (Some(address), _) => Some(address),
                (None, Some(home)) => home.wait_reusable().await,
                (None, None) => None,
            };
            let backend = ctx.backend();
            let address = match record {
                Some(address) => {
                    backend.edit_text(&address, &content)?;
                    address
                }
                None => backend.create_text(&content)?,
            };
            let mut state = state.lock();
            state.record = Some(address);
            state.home = None;
            Ok(address)
        }
        .boxed()
    }
}

/// One text record holding `tag` + `body`
pub struct InlineStore {
    ctx: Arc<StoreContext>,
    state: Arc<Mutex<InlineState>>,
    writer: Arc<CoalescedWriter>,
}

impl InlineStore {
    fn with_state(ctx: Arc<StoreContext>, state: InlineState) -> Self {
        let writer = CoalescedWriter::new("inline", Arc::clone(ctx.executor()));
        Self {
            ctx,
            state: Arc::new(Mutex::new(state)),
            writer,
        }
    }

    /// Schedule creation of a record holding `body`
    pub fn new(ctx: Arc<StoreContext>, tag: Discriminator, body: String) -> Result<Self> {
        Self::create(ctx, tag, body, None)
    }

    /// Schedule an edit of the record at `home` to hold `body`
    ///
    /// The edit waits for `home` to resolve; if its write failed a new
    /// record is created instead.
    pub fn replacing(
        ctx: Arc<StoreContext>,
        tag: Discriminator,
        body: String,
        home: Address,
    ) -> Result<Self> {
        Self::create(ctx, tag, body, Some(home))
    }

    fn create(
        ctx: Arc<StoreContext>,
        tag: Discriminator,
        body: String,
        home: Option<Address>,
    ) -> Result<Self> {
        check_fits(&ctx, tag, &body)?;
        let store = Self::with_state(
            ctx,
            InlineState {
                tag,
                body,
                record: None,
                home,
                handle: None,
            },
        );
        store.schedule();
        Ok(store)
    }

    /// Open the record at `address`, whatever its tag
    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let content = ctx.backend().read_text(&address)?;
        let (tag, body) = Discriminator::parse(&content)?;
        Ok(Self::from_record(ctx, address, tag, body.to_string()))
    }

    /// Wrap a record already read by the caller
    pub fn from_record(
        ctx: Arc<StoreContext>,
        address: RecordAddress,
        tag: Discriminator,
        body: String,
    ) -> Self {
        Self::with_state(
            ctx,
            InlineState {
                tag,
                body,
                record: Some(address),
                home: None,
                handle: Some(Address::resolved(address)),
            },
        )
    }

    fn schedule(&self) {
        let target = Arc::new(RecordWrite {
            ctx: Arc::clone(&self.ctx),
            state: Arc::clone(&self.state),
        });
        let handle = self.writer.request_write(target);
        self.state.lock().handle = Some(handle);
    }

    /// Replace the body and schedule the edit
    pub fn set(&self, body: String) -> Result<()> {
        let tag = self.tag();
        check_fits(&self.ctx, tag, &body)?;
        self.state.lock().body = body;
        self.schedule();
        Ok(())
    }

    pub fn body(&self) -> String {
        self.state.lock().body.clone()
    }

    pub fn tag(&self) -> Discriminator {
        self.state.lock().tag
    }

    /// Length of the record content
    pub fn encoded_len(&self) -> usize {
        let state = self.state.lock();
        state.tag.as_str().len() + state.body.len()
    }

    pub fn address(&self) -> Address {
        self.state
            .lock()
            .handle
            .clone()
            .unwrap_or_else(|| Address::failed(Error::internal("inline record was never written")))
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.wait_idle()
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.writer.set_error_sink(sink);
    }

    /// Number of record writes started
    pub fn writes(&self) -> u64 {
        self.writer.writes_issued()
    }
}

fn check_fits(ctx: &StoreContext, tag: Discriminator, body: &str) -> Result<()> {
    let size = tag.as_str().len() + body.len();
    let limit = ctx.config().page_limit;
    if size > limit {
        return Err(Error::ContentTooLarge { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, small_config};
    use chainstore_common::PayloadKind;

    #[test]
    fn test_create_and_load() {
        let (ctx, channel) = context(small_config());
        let tag = Discriminator::Inline(PayloadKind::Text);
        let store = InlineStore::new(Arc::clone(&ctx), tag, "hello".into()).unwrap();
        let address = store.address().resolve().unwrap();
        assert_eq!(ctx.backend().read_text(&address).unwrap(), "sshello");
        assert_eq!(channel.stats().text_creates, 1);

        let loaded = InlineStore::load(ctx, address).unwrap();
        assert_eq!(loaded.tag(), tag);
        assert_eq!(loaded.body(), "hello");
        assert_eq!(loaded.encoded_len(), 7);
    }

    #[test]
    fn test_set_edits_in_place() {
        let (ctx, channel) = context(small_config());
        let store = InlineStore::new(Arc::clone(&ctx), Discriminator::Integer, "1".into()).unwrap();
        let first = store.address().resolve().unwrap();
        for i in 2..=20 {
            store.set(i.to_string()).unwrap();
        }
        let last = store.address().resolve().unwrap();
        store.flush().unwrap();

        assert_eq!(first, last);
        assert_eq!(channel.stats().text_creates, 1);
        assert_eq!(ctx.backend().read_text(&last).unwrap(), "i20");
        assert!(store.writes() <= 20);
    }

    #[test]
    fn test_too_large() {
        let (ctx, _) = context(small_config());
        let tag = Discriminator::Inline(PayloadKind::Text);
        let result = InlineStore::new(Arc::clone(&ctx), tag, "x".repeat(199));
        assert!(matches!(result, Err(Error::ContentTooLarge { size: 201, limit: 200 })));

        let store = InlineStore::new(ctx, tag, String::new()).unwrap();
        assert!(store.set("y".repeat(300)).is_err());
        assert_eq!(store.body(), "");
    }

    #[test]
    fn test_load_unknown_tag() {
        let (ctx, _) = context(small_config());
        let address = ctx.backend().create_text("zzz").unwrap();
        assert!(matches!(
            InlineStore::load(ctx, address),
            Err(Error::UnknownDiscriminator(_))
        ));
    }

    #[test]
    fn test_create_failure_then_retry() {
        let (ctx, channel) = context(small_config());
        channel.set_fail_writes(true);
        let store = InlineStore::new(Arc::clone(&ctx), Discriminator::Null, String::new()).unwrap();
        assert!(store.address().resolve().unwrap_err().is_retryable());

        channel.set_fail_writes(false);
        store.set(String::new()).unwrap();
        let address = store.address().resolve().unwrap();
        assert_eq!(ctx.backend().read_text(&address).unwrap(), "n");
    }

    #[test]
    fn test_replacing_takes_over_record() {
        let (ctx, channel) = context(small_config());
        let old = InlineStore::new(Arc::clone(&ctx), Discriminator::Integer, "7".into()).unwrap();
        let tag = Discriminator::Inline(PayloadKind::Text);
        let new = InlineStore::replacing(Arc::clone(&ctx), tag, "seven".into(), old.address())
            .unwrap();
        let address = new.address().resolve().unwrap();

        assert_eq!(address, old.address().resolve().unwrap());
        assert_eq!(ctx.backend().read_text(&address).unwrap(), "ssseven");
        assert_eq!(channel.stats().text_creates, 1);
    }

    #[test]
    fn test_replacing_failed_home_creates_record() {
        let (ctx, _) = context(small_config());
        let home = Address::failed(Error::backend_write("rejected"));
        let store = InlineStore::replacing(Arc::clone(&ctx), Discriminator::Null, String::new(), home)
            .unwrap();
        let address = store.address().resolve().unwrap();
        assert_eq!(ctx.backend().read_text(&address).unwrap(), "n");
    }
}
