//! Core type definitions for chainstore
//!
//! This module defines the record address triple and the discriminator
//! protocol every stored record begins with.

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the fields of an encoded [`RecordAddress`]
pub const ADDRESS_SEPARATOR: char = '|';

/// Resolved handle to one backend record
///
/// `pool` selects the client credential, `channel` the destination on that
/// client, `native` the backend's own record number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{pool}|{channel}|{native}")]
pub struct RecordAddress {
    pub pool: u32,
    pub channel: u32,
    pub native: u64,
}

impl RecordAddress {
    /// Longest possible canonical encoding (`u32|u32|u64`)
    pub const MAX_ENCODED_LEN: usize = 10 + 1 + 10 + 1 + 20;

    #[must_use]
    pub const fn new(pool: u32, channel: u32, native: u64) -> Self {
        Self {
            pool,
            channel,
            native,
        }
    }

    /// Length of the canonical encoding of this address
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.to_string().len()
    }
}

impl fmt::Debug for RecordAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordAddress({self})")
    }
}

impl FromStr for RecordAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(s.to_string());
        let mut parts = s.split(ADDRESS_SEPARATOR);
        let pool = parts.next().ok_or_else(invalid)?;
        let channel = parts.next().ok_or_else(invalid)?;
        let native = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            pool: pool.parse().map_err(|_| invalid())?,
            channel: channel.parse().map_err(|_| invalid())?,
            native: native.parse().map_err(|_| invalid())?,
        })
    }
}

/// What the bytes of an inline or chunked payload mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Raw bytes
    Bytes,
    /// UTF-8 text
    Text,
    /// Caller-serialized value of a type the store does not know
    Opaque,
}

impl PayloadKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Bytes => "b",
            Self::Text => "s",
            Self::Opaque => "u",
        }
    }

    const fn from_prefix(b: u8) -> Option<Self> {
        match b {
            b'b' => Some(Self::Bytes),
            b's' => Some(Self::Text),
            b'u' => Some(Self::Opaque),
            _ => None,
        }
    }

    /// Human-readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::Text => "text",
            Self::Opaque => "opaque",
        }
    }
}

/// Leading tag of every text record
///
/// The set is closed: loading a record by address reads this tag and
/// dispatches through [`Discriminator::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// Whole payload embedded in the record
    Inline(PayloadKind),
    /// Root page of a chunked payload's manifest
    ChunkedRoot(PayloadKind),
    /// Continuation page of a chunked payload's manifest
    ManifestPage,
    /// Integer value
    Integer,
    /// Root page of a list's element manifest
    ListRoot,
    /// Continuation page of a list's element manifest
    ListPage,
    /// Null value
    Null,
}

impl Discriminator {
    /// Every discriminator, for exhaustive protocol tests
    pub const ALL: [Self; 11] = [
        Self::Inline(PayloadKind::Bytes),
        Self::Inline(PayloadKind::Text),
        Self::Inline(PayloadKind::Opaque),
        Self::ChunkedRoot(PayloadKind::Bytes),
        Self::ChunkedRoot(PayloadKind::Text),
        Self::ChunkedRoot(PayloadKind::Opaque),
        Self::ManifestPage,
        Self::Integer,
        Self::ListRoot,
        Self::ListPage,
        Self::Null,
    ];

    /// The tag as written at the start of a record
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline(PayloadKind::Bytes) => "bs",
            Self::Inline(PayloadKind::Text) => "ss",
            Self::Inline(PayloadKind::Opaque) => "us",
            Self::ChunkedRoot(PayloadKind::Bytes) => "bl",
            Self::ChunkedRoot(PayloadKind::Text) => "sl",
            Self::ChunkedRoot(PayloadKind::Opaque) => "ul",
            Self::ManifestPage => "c",
            Self::Integer => "i",
            Self::ListRoot => "L",
            Self::ListPage => "P",
            Self::Null => "n",
        }
    }

    /// Split a record into its discriminator and body
    pub fn parse(record: &str) -> Result<(Self, &str)> {
        let bytes = record.as_bytes();
        if bytes.len() >= 2
            && let Some(kind) = PayloadKind::from_prefix(bytes[0])
        {
            let tag = match bytes[1] {
                b's' => Some(Self::Inline(kind)),
                b'l' => Some(Self::ChunkedRoot(kind)),
                _ => None,
            };
            if let Some(tag) = tag {
                return Ok((tag, &record[2..]));
            }
        }
        let tag = match bytes.first() {
            Some(b'c') => Self::ManifestPage,
            Some(b'i') => Self::Integer,
            Some(b'L') => Self::ListRoot,
            Some(b'P') => Self::ListPage,
            Some(b'n') => Self::Null,
            _ => {
                let found: String = record.chars().take(2).collect();
                return Err(Error::UnknownDiscriminator(found));
            }
        };
        Ok((tag, &record[1..]))
    }

    /// Parse `record` and require it to carry this discriminator
    pub fn expect<'a>(self, address: RecordAddress, record: &'a str) -> Result<&'a str> {
        let mismatch = |found: String| Error::DiscriminatorMismatch {
            address,
            expected: self.to_string(),
            found,
        };
        match Self::parse(record) {
            Ok((tag, body)) if tag == self => Ok(body),
            Ok((tag, _)) => Err(mismatch(tag.as_str().to_string())),
            Err(Error::UnknownDiscriminator(found)) => Err(mismatch(found)),
            Err(e) => Err(e),
        }
    }

    /// Payload kind carried by inline and chunked tags
    #[must_use]
    pub const fn payload_kind(self) -> Option<PayloadKind> {
        match self {
            Self::Inline(kind) | Self::ChunkedRoot(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(kind) => write!(f, "inline {}", kind.name()),
            Self::ChunkedRoot(kind) => write!(f, "chunked {} root", kind.name()),
            Self::ManifestPage => f.write_str("manifest page"),
            Self::Integer => f.write_str("integer"),
            Self::ListRoot => f.write_str("list root"),
            Self::ListPage => f.write_str("list page"),
            Self::Null => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let addr = RecordAddress::new(2, 5, 91_423);
        assert_eq!(addr.to_string(), "2|5|91423");
        assert_eq!("2|5|91423".parse::<RecordAddress>().unwrap(), addr);
    }

    #[test]
    fn test_address_max_len() {
        let addr = RecordAddress::new(u32::MAX, u32::MAX, u64::MAX);
        assert_eq!(addr.encoded_len(), RecordAddress::MAX_ENCODED_LEN);
    }

    #[test]
    fn test_address_rejects_garbage() {
        for bad in ["", "1|2", "1|2|3|4", "a|2|3", "1||3", "1|2|-3"] {
            assert!(
                matches!(bad.parse::<RecordAddress>(), Err(Error::InvalidAddress(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_discriminator_parse_all() {
        for tag in Discriminator::ALL {
            let record = format!("{}body", tag.as_str());
            let (parsed, body) = Discriminator::parse(&record).unwrap();
            assert_eq!(parsed, tag);
            assert_eq!(body, "body");
        }
    }

    #[test]
    fn test_discriminator_unknown() {
        assert!(matches!(
            Discriminator::parse("zz"),
            Err(Error::UnknownDiscriminator(_))
        ));
        assert!(matches!(
            Discriminator::parse(""),
            Err(Error::UnknownDiscriminator(_))
        ));
    }

    #[test]
    fn test_discriminator_expect() {
        let addr = RecordAddress::new(0, 0, 1);
        assert_eq!(Discriminator::Integer.expect(addr, "i42").unwrap(), "42");

        let err = Discriminator::ListRoot.expect(addr, "i42").unwrap_err();
        assert!(matches!(err, Error::DiscriminatorMismatch { ref found, .. } if found == "i"));

        let err = Discriminator::Null.expect(addr, "?").unwrap_err();
        assert!(err.is_decode_error());
    }
}
