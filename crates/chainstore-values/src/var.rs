//! Handles over any stored value
//!
//! [`Var::load`] reads a record's discriminator and opens the matching
//! container; [`Var::store`] does the reverse for a plain [`Value`]. A var
//! keeps its address for life: setting a value of another kind writes the
//! new container over the old root record.

use crate::integer::{Integer, NullRecord};
use crate::list::List;
use crate::payload::{Blob, Opaque, Text};
use crate::value::{Value, ValueKind};
use chainstore_client::RecordBackend;
use chainstore_common::{Discriminator, Error, PayloadKind, RecordAddress, Result};
use chainstore_storage::{AdaptiveStore, Address, StoreContext};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
enum Handle {
    Null(Arc<NullRecord>),
    Integer(Arc<Integer>),
    Bytes(Arc<Blob>),
    Text(Arc<Text>),
    Opaque(Arc<Opaque>),
    List(Arc<List>),
}

impl Handle {
    const fn kind(&self) -> ValueKind {
        match self {
            Self::Null(_) => ValueKind::Null,
            Self::Integer(_) => ValueKind::Integer,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Text(_) => ValueKind::Text,
            Self::Opaque(_) => ValueKind::Opaque,
            Self::List(_) => ValueKind::List,
        }
    }

    fn address(&self) -> Address {
        match self {
            Self::Null(null) => null.address(),
            Self::Integer(integer) => integer.address(),
            Self::Bytes(blob) => blob.address(),
            Self::Text(text) => text.address(),
            Self::Opaque(opaque) => opaque.address(),
            Self::List(list) => list.address(),
        }
    }

    fn flush(&self) -> Result<()> {
        match self {
            Self::Null(null) => null.flush(),
            Self::Integer(integer) => integer.flush(),
            Self::Bytes(blob) => blob.flush(),
            Self::Text(text) => text.flush(),
            Self::Opaque(opaque) => opaque.flush(),
            Self::List(list) => list.flush(),
        }
    }

    fn get(&self) -> Result<Value> {
        Ok(match self {
            Self::Null(_) => Value::Null,
            Self::Integer(integer) => Value::Integer(integer.get()),
            Self::Bytes(blob) => Value::Bytes(blob.get()?),
            Self::Text(text) => Value::Text(text.get()?),
            Self::Opaque(opaque) => Value::Opaque(opaque.get()?),
            Self::List(list) => Value::List(list.to_values()?),
        })
    }

    fn create(ctx: &Arc<StoreContext>, value: Value) -> Result<Self> {
        let ctx = Arc::clone(ctx);
        Ok(match value {
            Value::Null => Self::Null(Arc::new(NullRecord::new(ctx)?)),
            Value::Integer(value) => Self::Integer(Arc::new(Integer::new(ctx, value)?)),
            Value::Bytes(payload) => Self::Bytes(Arc::new(Blob::new(ctx, payload)?)),
            Value::Text(text) => Self::Text(Arc::new(Text::new(ctx, &text)?)),
            Value::Opaque(payload) => Self::Opaque(Arc::new(Opaque::new(ctx, payload)?)),
            Value::List(values) => Self::List(Arc::new(List::new(ctx, values)?)),
        })
    }

    /// Containers for `value` whose root record is `home`
    fn replacing(ctx: &Arc<StoreContext>, value: Value, home: Address) -> Result<Self> {
        let ctx = Arc::clone(ctx);
        Ok(match value {
            Value::Null => Self::Null(Arc::new(NullRecord::replacing(ctx, home)?)),
            Value::Integer(value) => {
                Self::Integer(Arc::new(Integer::replacing(ctx, value, home)?))
            }
            Value::Bytes(payload) => Self::Bytes(Arc::new(Blob::replacing(ctx, payload, home)?)),
            Value::Text(text) => Self::Text(Arc::new(Text::replacing(ctx, &text, home)?)),
            Value::Opaque(payload) => {
                Self::Opaque(Arc::new(Opaque::replacing(ctx, payload, home)?))
            }
            Value::List(values) => Self::List(Arc::new(List::replacing(ctx, values, home)?)),
        })
    }

    /// Update in place when `value` has this handle's kind
    ///
    /// Hands `value` back when the kinds differ.
    fn update(&self, value: Value) -> Result<Option<Value>> {
        match (self, value) {
            (Self::Null(_), Value::Null) => {}
            (Self::Integer(integer), Value::Integer(value)) => integer.set(value)?,
            (Self::Bytes(blob), Value::Bytes(payload)) => blob.set(payload)?,
            (Self::Text(text), Value::Text(value)) => text.set(&value)?,
            (Self::Opaque(opaque), Value::Opaque(payload)) => opaque.set(payload)?,
            (Self::List(list), Value::List(values)) => list.replace(values)?,
            (_, other) => return Ok(Some(other)),
        }
        Ok(None)
    }
}

/// A stored value of any kind
pub struct Var {
    ctx: Arc<StoreContext>,
    handle: Mutex<Handle>,
}

impl Var {
    /// Schedule the records for `value`
    pub fn store(ctx: Arc<StoreContext>, value: Value) -> Result<Self> {
        let handle = Handle::create(&ctx, value)?;
        Ok(Self {
            ctx,
            handle: Mutex::new(handle),
        })
    }

    /// Open whatever value is stored at `address`
    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let content = ctx.backend().read_text(&address)?;
        let (tag, body) = Discriminator::parse(&content)?;
        let handle = match tag {
            Discriminator::Null => {
                Handle::Null(Arc::new(NullRecord::from_record(Arc::clone(&ctx), address)))
            }
            Discriminator::Integer => Handle::Integer(Arc::new(Integer::from_record(
                Arc::clone(&ctx),
                address,
                body,
            )?)),
            Discriminator::Inline(kind) | Discriminator::ChunkedRoot(kind) => {
                let store = AdaptiveStore::from_record(Arc::clone(&ctx), kind, address, tag, body)?;
                match kind {
                    PayloadKind::Bytes => Handle::Bytes(Arc::new(Blob::from_store(store))),
                    PayloadKind::Text => Handle::Text(Arc::new(Text::from_store(store))),
                    PayloadKind::Opaque => Handle::Opaque(Arc::new(Opaque::from_store(store))),
                }
            }
            Discriminator::ListRoot => Handle::List(Arc::new(List::load(Arc::clone(&ctx), address)?)),
            Discriminator::ManifestPage | Discriminator::ListPage => {
                return Err(Error::DiscriminatorMismatch {
                    address,
                    expected: "value".to_string(),
                    found: tag.as_str().to_string(),
                });
            }
        };
        debug!("Loaded {} value from {}", handle.kind(), address);
        Ok(Self {
            ctx,
            handle: Mutex::new(handle),
        })
    }

    /// The value as plain data
    pub fn get(&self) -> Result<Value> {
        let handle = self.handle.lock().clone();
        handle.get()
    }

    /// Replace the value
    ///
    /// A value of the same kind updates the existing records; another kind
    /// gets new containers whose root record is this var's record.
    pub fn set(&self, value: Value) -> Result<()> {
        let mut handle = self.handle.lock();
        if let Some(value) = handle.update(value)? {
            debug!("Value changes kind from {} to {}", handle.kind(), value.kind());
            *handle = Handle::replacing(&self.ctx, value, handle.address())?;
        }
        Ok(())
    }

    pub fn kind(&self) -> ValueKind {
        self.handle.lock().kind()
    }

    pub fn address(&self) -> Address {
        self.handle.lock().address()
    }

    pub fn flush(&self) -> Result<()> {
        let handle = self.handle.lock().clone();
        handle.flush()
    }

    pub fn as_integer(&self) -> Option<Arc<Integer>> {
        match &*self.handle.lock() {
            Handle::Integer(integer) => Some(Arc::clone(integer)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<Arc<Text>> {
        match &*self.handle.lock() {
            Handle::Text(text) => Some(Arc::clone(text)),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<Arc<Blob>> {
        match &*self.handle.lock() {
            Handle::Bytes(blob) => Some(Arc::clone(blob)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<Arc<List>> {
        match &*self.handle.lock() {
            Handle::List(list) => Some(Arc::clone(list)),
            _ => None,
        }
    }
}
