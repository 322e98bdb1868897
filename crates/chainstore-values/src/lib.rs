//! Chainstore Values - Typed values over the storage engine
//!
//! This crate maps plain values onto records:
//! - [`Integer`] and [`NullRecord`]: single records
//! - [`Blob`], [`Text`], [`Opaque`]: size-adaptive payloads
//! - [`List`]: element records behind a list manifest
//! - [`Var`]: a handle over any of them, loaded by record tag

pub mod integer;
pub mod list;
pub mod payload;
pub mod value;
pub mod var;

// Re-exports
pub use integer::{Integer, NullRecord};
pub use list::List;
pub use payload::{Blob, Opaque, Text};
pub use value::{Value, ValueKind};
pub use var::Var;
