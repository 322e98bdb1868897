//! Chainstore Common - Shared types and utilities
//!
//! This crate provides the record addressing types, the record
//! discriminator protocol, error definitions and configuration used across
//! all chainstore components.

pub mod config;
pub mod error;
pub mod types;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use types::*;
