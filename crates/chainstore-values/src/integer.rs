//! Integer and null records

use chainstore_client::RecordBackend;
use chainstore_common::{Discriminator, Error, RecordAddress, Result};
use chainstore_storage::{Address, ErrorSink, InlineStore, StoreContext};
use parking_lot::Mutex;
use std::sync::Arc;

/// Signed integer kept in one `i<decimal>` record
pub struct Integer {
    store: InlineStore,
    value: Mutex<i64>,
}

impl Integer {
    /// Schedule creation of a record holding `value`
    pub fn new(ctx: Arc<StoreContext>, value: i64) -> Result<Self> {
        let store = InlineStore::new(ctx, Discriminator::Integer, value.to_string())?;
        Ok(Self {
            store,
            value: Mutex::new(value),
        })
    }

    /// Write `value` over the record at `home`
    pub fn replacing(ctx: Arc<StoreContext>, value: i64, home: Address) -> Result<Self> {
        let store = InlineStore::replacing(ctx, Discriminator::Integer, value.to_string(), home)?;
        Ok(Self {
            store,
            value: Mutex::new(value),
        })
    }

    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let content = ctx.backend().read_text(&address)?;
        let body = Discriminator::Integer.expect(address, &content)?;
        Self::from_record(ctx, address, body)
    }

    pub(crate) fn from_record(
        ctx: Arc<StoreContext>,
        address: RecordAddress,
        body: &str,
    ) -> Result<Self> {
        let value = body
            .parse::<i64>()
            .map_err(|e| Error::malformed(address, format!("invalid integer {body:?}: {e}")))?;
        let store = InlineStore::from_record(ctx, address, Discriminator::Integer, body.to_string());
        Ok(Self {
            store,
            value: Mutex::new(value),
        })
    }

    pub fn get(&self) -> i64 {
        *self.value.lock()
    }

    pub fn set(&self, value: i64) -> Result<()> {
        let mut current = self.value.lock();
        self.store.set(value.to_string())?;
        *current = value;
        Ok(())
    }

    /// Replace the value with `op(value)` and return the result
    fn update(&self, op: impl FnOnce(i64) -> Result<i64>) -> Result<i64> {
        let mut current = self.value.lock();
        let value = op(*current)?;
        self.store.set(value.to_string())?;
        *current = value;
        Ok(value)
    }

    /// Add `rhs` and return the new value
    pub fn add(&self, rhs: i64) -> Result<i64> {
        self.update(|value| value.checked_add(rhs).ok_or_else(|| overflow(value, "+", rhs)))
    }

    pub fn sub(&self, rhs: i64) -> Result<i64> {
        self.update(|value| value.checked_sub(rhs).ok_or_else(|| overflow(value, "-", rhs)))
    }

    pub fn mul(&self, rhs: i64) -> Result<i64> {
        self.update(|value| value.checked_mul(rhs).ok_or_else(|| overflow(value, "*", rhs)))
    }

    /// Divide by `rhs`, rounding toward negative infinity
    pub fn floor_div(&self, rhs: i64) -> Result<i64> {
        self.update(|value| floor_div(value, rhs))
    }

    /// Remainder of [`Integer::floor_div`]; takes the sign of `rhs`
    pub fn floor_mod(&self, rhs: i64) -> Result<i64> {
        self.update(|value| floor_mod(value, rhs))
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

fn overflow(lhs: i64, op: &str, rhs: i64) -> Error {
    Error::IntegerOverflow(format!("{lhs} {op} {rhs}"))
}

fn floor_div(lhs: i64, rhs: i64) -> Result<i64> {
    if rhs == 0 {
        return Err(Error::DivisionByZero(format!("{lhs} // 0")));
    }
    let quotient = lhs.checked_div(rhs).ok_or_else(|| overflow(lhs, "//", rhs))?;
    if lhs % rhs != 0 && (lhs < 0) != (rhs < 0) {
        return Ok(quotient - 1);
    }
    Ok(quotient)
}

fn floor_mod(lhs: i64, rhs: i64) -> Result<i64> {
    if rhs == 0 {
        return Err(Error::DivisionByZero(format!("{lhs} % 0")));
    }
    let remainder = lhs.wrapping_rem(rhs);
    if remainder != 0 && (remainder < 0) != (rhs < 0) {
        return Ok(remainder + rhs);
    }
    Ok(remainder)
}

/// The `n` record
pub struct NullRecord {
    store: InlineStore,
}

impl NullRecord {
    pub fn new(ctx: Arc<StoreContext>) -> Result<Self> {
        Ok(Self {
            store: InlineStore::new(ctx, Discriminator::Null, String::new())?,
        })
    }

    /// Write a null over the record at `home`
    pub fn replacing(ctx: Arc<StoreContext>, home: Address) -> Result<Self> {
        Ok(Self {
            store: InlineStore::replacing(ctx, Discriminator::Null, String::new(), home)?,
        })
    }

    pub fn load(ctx: Arc<StoreContext>, address: RecordAddress) -> Result<Self> {
        let content = ctx.backend().read_text(&address)?;
        Discriminator::Null.expect(address, &content)?;
        Ok(Self::from_record(ctx, address))
    }

    pub(crate) fn from_record(ctx: Arc<StoreContext>, address: RecordAddress) -> Self {
        Self {
            store: InlineStore::from_record(ctx, address, Discriminator::Null, String::new()),
        }
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

    #[test]
    fn test_integer_record_format() {
        let (ctx, _) = context();
        let value = Integer::new(Arc::clone(&ctx), -42).unwrap();
        let address = value.address().resolve().unwrap();
        assert_eq!(ctx.backend().read_text(&address).unwrap(), "i-42");

        let loaded = Integer::load(ctx, address).unwrap();
        assert_eq!(loaded.get(), -42);
    }

    #[test]
    fn test_add_edits_same_record() {
        let (ctx, channel) = context();
        let counter = Integer::new(Arc::clone(&ctx), 0).unwrap();
        for _ in 0..25 {
            counter.add(2).unwrap();
        }
        assert_eq!(counter.get(), 50);
        counter.flush().unwrap();

        let address = counter.address().resolve().unwrap();
        assert_eq!(Integer::load(ctx, address).unwrap().get(), 50);
        assert_eq!(channel.stats().text_creates, 1);
    }

    #[test]
    fn test_add_overflow_keeps_value() {
        let (ctx, _) = context();
        let value = Integer::new(ctx, i64::MAX - 1).unwrap();
        assert!(matches!(value.add(5), Err(Error::IntegerOverflow(_))));
        assert_eq!(value.get(), i64::MAX - 1);
    }

    #[test]
    fn test_arithmetic() {
        let (ctx, channel) = context();
        let value = Integer::new(Arc::clone(&ctx), 10).unwrap();
        assert_eq!(value.sub(13).unwrap(), -3);
        assert_eq!(value.mul(-4).unwrap(), 12);
        assert_eq!(value.floor_div(5).unwrap(), 2);
        assert_eq!(value.floor_mod(3).unwrap(), 2);
        value.flush().unwrap();

        let address = value.address().resolve().unwrap();
        assert_eq!(Integer::load(ctx, address).unwrap().get(), 2);
        assert_eq!(channel.stats().text_creates, 1);
    }

    #[test]
    fn test_floor_division_rounds_down() {
        assert_eq!(floor_div(7, 2), Ok(3));
        assert_eq!(floor_div(-7, 2), Ok(-4));
        assert_eq!(floor_div(7, -2), Ok(-4));
        assert_eq!(floor_div(-7, -2), Ok(3));
        assert_eq!(floor_mod(-7, 2), Ok(1));
        assert_eq!(floor_mod(7, -2), Ok(-1));
        assert_eq!(floor_mod(-6, 3), Ok(0));
        assert_eq!(floor_mod(i64::MIN, -1), Ok(0));
        assert!(matches!(floor_div(i64::MIN, -1), Err(Error::IntegerOverflow(_))));
    }

    #[test]
    fn test_division_by_zero_keeps_value() {
        let (ctx, _) = context();
        let value = Integer::new(ctx, 9).unwrap();
        assert!(matches!(value.floor_div(0), Err(Error::DivisionByZero(_))));
        assert!(matches!(value.floor_mod(0), Err(Error::DivisionByZero(_))));
        assert!(matches!(value.mul(i64::MAX), Err(Error::IntegerOverflow(_))));
        assert_eq!(value.get(), 9);
    }

    #[test]
    fn test_load_rejects_other_records() {
        let (ctx, _) = context();
        let text = ctx.backend().create_text("ssnot a number").unwrap();
        let err = Integer::load(Arc::clone(&ctx), text).err().unwrap();
        assert!(matches!(err, Error::DiscriminatorMismatch { .. }));

        let garbage = ctx.backend().create_text("i12x").unwrap();
        let err = Integer::load(ctx, garbage).err().unwrap();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn test_null_record() {
        let (ctx, _) = context();
        let null = NullRecord::new(Arc::clone(&ctx)).unwrap();
        let address = null.address().resolve().unwrap();
        assert_eq!(ctx.backend().read_text(&address).unwrap(), "n");
        assert!(NullRecord::load(ctx, address).is_ok());
    }
}
