//! Payload body encoding for text records
//!
//! Text payloads are stored as-is. Bytes and opaque payloads are base64
//! encoded (standard alphabet, padded) so they survive a text record.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chainstore_common::{Error, PayloadKind, RecordAddress, Result};

/// Encode a payload as an inline record body
pub fn encode_body(kind: PayloadKind, payload: &[u8]) -> Result<String> {
    match kind {
        PayloadKind::Text => std::str::from_utf8(payload)
            .map(str::to_string)
            .map_err(|_| Error::TypeMismatch {
                expected: "utf-8 text",
                found: "binary data",
            }),
        PayloadKind::Bytes | PayloadKind::Opaque => Ok(STANDARD.encode(payload)),
    }
}

/// Decode an inline record body read from `address`
pub fn decode_body(kind: PayloadKind, address: RecordAddress, body: &str) -> Result<Bytes> {
    match kind {
        PayloadKind::Text => Ok(Bytes::copy_from_slice(body.as_bytes())),
        PayloadKind::Bytes | PayloadKind::Opaque => STANDARD
            .decode(body)
            .map(Bytes::from)
            .map_err(|e| Error::malformed(address, format!("invalid base64 body: {e}"))),
    }
}

/// Length of the encoded body for a payload of `len` bytes
pub const fn encoded_body_len(kind: PayloadKind, len: usize) -> usize {
    match kind {
        PayloadKind::Text => len,
        PayloadKind::Bytes | PayloadKind::Opaque => len.div_ceil(3) * 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_raw() {
        let body = encode_body(PayloadKind::Text, "héllo".as_bytes()).unwrap();
        assert_eq!(body, "héllo");
        assert_eq!(encoded_body_len(PayloadKind::Text, 6), body.len());
    }

    #[test]
    fn test_bytes_are_base64() {
        let payload = [0u8, 255, 1, 2];
        let body = encode_body(PayloadKind::Bytes, &payload).unwrap();
        assert_eq!(body, "AP8BAg==");
        assert_eq!(encoded_body_len(PayloadKind::Bytes, payload.len()), body.len());

        let addr = RecordAddress::new(0, 0, 1);
        let decoded = decode_body(PayloadKind::Bytes, addr, &body).unwrap();
        assert_eq!(&decoded[..], &payload);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            encode_body(PayloadKind::Text, &[0xff, 0xfe]),
            Err(Error::TypeMismatch { .. })
        ));
        let addr = RecordAddress::new(0, 0, 1);
        let err = decode_body(PayloadKind::Opaque, addr, "not base64!").unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_encoded_len_matches_for_all_sizes() {
        for len in 0..64 {
            let payload = vec![7u8; len];
            let body = encode_body(PayloadKind::Opaque, &payload).unwrap();
            assert_eq!(encoded_body_len(PayloadKind::Opaque, len), body.len());
        }
    }
}
