//! BER decoding.
//!
//! Zero-copy decoding over `Bytes`. Every read is bounds-checked and fails
//! with [`Error::Malformed`] rather than panicking.

use super::length::decode_length;
use super::tag;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use bytes::Bytes;

/// BER decoder that reads from a byte buffer.
///
/// `base` is the offset of this decoder's buffer within the outermost
/// message, so errors from nested decoders report absolute offsets.
#[derive(Debug)]
pub struct Decoder {
    data: Bytes,
    offset: usize,
    base: usize,
}

impl Decoder {
    /// Create a new decoder from bytes.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            base: 0,
        }
    }

    /// Create a decoder from a byte slice (copies the data).
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Current offset, relative to the outermost message.
    pub fn offset(&self) -> usize {
        self.base + self.offset
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Check if we've reached the end.
    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Peek at the next tag without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    fn error(&self, kind: DecodeErrorKind) -> Error {
        tracing::debug!(
            target: "snmp_query::ber",
            { snmp.offset = self.offset(), kind = %kind },
            "decode failed"
        );
        Error::malformed(self.offset(), kind)
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = self
            .data
            .get(self.offset)
            .copied()
            .ok_or_else(|| self.error(DecodeErrorKind::TruncatedData))?;
        self.offset += 1;
        Ok(byte)
    }

    /// Read a tag byte.
    pub fn read_tag(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Read a definite length.
    pub fn read_length(&mut self) -> Result<usize> {
        let rest = self.data.get(self.offset..).unwrap_or_default();
        let (len, consumed) = decode_length(rest, self.offset())?;
        self.offset += consumed;
        Ok(len)
    }

    /// Read raw bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        let end = self.offset.saturating_add(len);
        if end > self.data.len() {
            return Err(self.error(DecodeErrorKind::InsufficientData {
                needed: len,
                available: self.remaining(),
            }));
        }
        let bytes = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(bytes)
    }

    /// Read and expect a specific tag, returning the content length.
    pub fn expect_tag(&mut self, expected: u8) -> Result<usize> {
        let actual = self.read_tag()?;
        if actual != expected {
            self.offset -= 1;
            return Err(self.error(DecodeErrorKind::UnexpectedTag { expected, actual }));
        }
        self.read_length()
    }

    /// Read a BER INTEGER.
    pub fn read_integer(&mut self) -> Result<i32> {
        let len = self.expect_tag(tag::universal::INTEGER)?;
        self.read_integer_value(len)
    }

    /// Read INTEGER content of the given length.
    ///
    /// Non-minimal encodings are accepted as long as the value fits in 32 bits.
    pub fn read_integer_value(&mut self, len: usize) -> Result<i32> {
        if len == 0 {
            return Err(self.error(DecodeErrorKind::ZeroLengthInteger));
        }
        let start = self.offset();
        let bytes = self.read_bytes(len)?;

        let negative = bytes[0] & 0x80 != 0;
        let pad = if negative { 0xFF } else { 0x00 };
        let significant = bytes
            .iter()
            .position(|&b| b != pad)
            .unwrap_or(bytes.len());
        // keep one padding octet if the next octet's sign bit disagrees
        let keep_pad = significant < bytes.len() && ((bytes[significant] & 0x80 != 0) != negative);
        let width = bytes.len() - significant + usize::from(keep_pad);
        if width > 4 {
            return Err(Error::malformed(start, DecodeErrorKind::IntegerOverflow));
        }
        if len > 4 {
            tracing::warn!(
                target: "snmp_query::ber",
                { snmp.offset = start, length = len },
                "non-minimal integer encoding"
            );
        }

        let value = bytes
            .iter()
            .fold(if negative { -1i64 } else { 0i64 }, |acc, &b| {
                (acc << 8) | b as i64
            });
        i32::try_from(value).map_err(|_| Error::malformed(start, DecodeErrorKind::IntegerOverflow))
    }

    /// Read an unsigned 32-bit value with the given tag.
    pub fn read_unsigned32(&mut self, expected_tag: u8) -> Result<u32> {
        let len = self.expect_tag(expected_tag)?;
        self.read_unsigned32_value(len)
    }

    /// Read unsigned 32-bit content of the given length.
    pub fn read_unsigned32_value(&mut self, len: usize) -> Result<u32> {
        let start = self.offset();
        let value = self.read_unsigned_content(len, 5)?;
        u32::try_from(value).map_err(|_| Error::malformed(start, DecodeErrorKind::IntegerOverflow))
    }

    /// Read a Counter64.
    pub fn read_counter64(&mut self) -> Result<u64> {
        let len = self.expect_tag(tag::application::COUNTER64)?;
        self.read_counter64_value(len)
    }

    /// Read Counter64 content of the given length.
    pub fn read_counter64_value(&mut self, len: usize) -> Result<u64> {
        let start = self.offset();
        if len > 9 {
            return Err(self.error(DecodeErrorKind::Integer64TooLong { length: len }));
        }
        let value = self.read_unsigned_content(len, 9)?;
        u64::try_from(value).map_err(|_| Error::malformed(start, DecodeErrorKind::IntegerOverflow))
    }

    fn read_unsigned_content(&mut self, len: usize, max: usize) -> Result<u128> {
        if len == 0 {
            return Err(self.error(DecodeErrorKind::ZeroLengthInteger));
        }
        if len > max {
            return Err(self.error(DecodeErrorKind::IntegerOverflow));
        }
        let bytes = self.read_bytes(len)?;
        Ok(bytes
            .iter()
            .fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    /// Read an OCTET STRING.
    pub fn read_octet_string(&mut self) -> Result<Bytes> {
        if self.peek_tag() == Some(tag::universal::OCTET_STRING_CONSTRUCTED) {
            return Err(self.error(DecodeErrorKind::ConstructedOctetString));
        }
        let len = self.expect_tag(tag::universal::OCTET_STRING)?;
        self.read_bytes(len)
    }

    /// Read a NULL.
    pub fn read_null(&mut self) -> Result<()> {
        let len = self.expect_tag(tag::universal::NULL)?;
        if len != 0 {
            return Err(self.error(DecodeErrorKind::InvalidNull));
        }
        Ok(())
    }

    /// Read an OBJECT IDENTIFIER.
    pub fn read_oid(&mut self) -> Result<Oid> {
        let len = self.expect_tag(tag::universal::OBJECT_IDENTIFIER)?;
        self.read_oid_value(len)
    }

    /// Read OID content of the given length.
    pub fn read_oid_value(&mut self, len: usize) -> Result<Oid> {
        let start = self.offset();
        let bytes = self.read_bytes(len)?;
        Oid::from_ber(&bytes).map_err(|e| match e {
            Error::Malformed { kind, offset, .. } => Error::malformed(start + offset, kind),
            other => other,
        })
    }

    /// Read an IpAddress.
    pub fn read_ip_address(&mut self) -> Result<[u8; 4]> {
        let len = self.expect_tag(tag::application::IP_ADDRESS)?;
        self.read_ip_address_value(len)
    }

    /// Read IpAddress content of the given length.
    pub fn read_ip_address_value(&mut self, len: usize) -> Result<[u8; 4]> {
        if len != 4 {
            return Err(self.error(DecodeErrorKind::InvalidIpAddressLength { length: len }));
        }
        let bytes = self.read_bytes(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Read a SEQUENCE, returning a decoder for its contents.
    pub fn read_sequence(&mut self) -> Result<Decoder> {
        self.read_constructed(tag::universal::SEQUENCE)
    }

    /// Read a constructed value with a specific tag, returning a decoder for its contents.
    pub fn read_constructed(&mut self, expected_tag: u8) -> Result<Decoder> {
        let len = self.expect_tag(expected_tag)?;
        self.sub_decoder(len)
    }

    /// Split off the next `len` bytes as a nested decoder.
    pub fn sub_decoder(&mut self, len: usize) -> Result<Decoder> {
        let base = self.offset();
        let data = self.read_bytes(len)?;
        Ok(Decoder {
            data,
            offset: 0,
            base,
        })
    }

    /// Skip a TLV without parsing it.
    pub fn skip_tlv(&mut self) -> Result<()> {
        self.read_tag()?;
        let len = self.read_length()?;
        self.read_bytes(len).map(drop)
    }

    /// Require that all content has been consumed.
    ///
    /// Used after the last field of a constructed value: leftover bytes mean
    /// the declared length disagrees with the fields it holds.
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.error(DecodeErrorKind::LengthMismatch {
                declared: self.data.len(),
                consumed: self.offset,
            }))
        }
    }

    /// Get the underlying bytes for the entire buffer.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

/// Open the outer SEQUENCE of a complete message.
///
/// The SEQUENCE must span the whole input; trailing bytes are rejected.
pub fn decode_message_sequence(data: Bytes) -> Result<Decoder> {
    if data.is_empty() {
        return Err(Error::malformed(0, DecodeErrorKind::TruncatedData));
    }
    let mut outer = Decoder::new(data);
    let seq = outer.read_sequence()?;
    if !outer.is_empty() {
        return Err(Error::malformed(
            outer.offset(),
            DecodeErrorKind::TrailingData {
                remaining: outer.remaining(),
            },
        ));
    }
    Ok(seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    fn category(err: Error) -> DecodeError {
        err.decode_error().expect("malformed error")
    }

    #[test]
    fn integers() {
        let cases: &[(&[u8], i32)] = &[
            (&[0x02, 0x01, 0x00], 0),
            (&[0x02, 0x01, 0x7F], 127),
            (&[0x02, 0x02, 0x00, 0x80], 128),
            (&[0x02, 0x01, 0xFF], -1),
            (&[0x02, 0x01, 0x80], -128),
            (&[0x02, 0x04, 0x7F, 0xFF, 0xFF, 0xFF], i32::MAX),
            (&[0x02, 0x04, 0x80, 0x00, 0x00, 0x00], i32::MIN),
        ];
        for (bytes, expected) in cases {
            assert_eq!(Decoder::from_slice(bytes).read_integer().unwrap(), *expected);
        }
    }

    #[test]
    fn non_minimal_integer_accepted_when_it_fits() {
        let mut dec = Decoder::from_slice(&[0x02, 0x02, 0x00, 0x01]);
        assert_eq!(dec.read_integer().unwrap(), 1);

        let mut dec = Decoder::from_slice(&[0x02, 0x05, 0x00, 0x80, 0x00, 0x00, 0x00]);
        assert_eq!(
            dec.read_integer().unwrap_err().decode_error(),
            Some(DecodeError::MalformedLength)
        );

        let mut dec = Decoder::from_slice(&[0x02, 0x05, 0x00, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(dec.read_integer().unwrap(), 0x12345678);

        let mut dec = Decoder::from_slice(&[0x02, 0x05, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(dec.read_integer().unwrap(), -1);
    }

    #[test]
    fn oversized_integer_rejected() {
        let mut dec = Decoder::from_slice(&[0x02, 0x05, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(category(dec.read_integer().unwrap_err()), DecodeError::MalformedLength);
    }

    #[test]
    fn zero_length_integer_rejected() {
        let mut dec = Decoder::from_slice(&[0x02, 0x00]);
        assert_eq!(category(dec.read_integer().unwrap_err()), DecodeError::MalformedLength);
    }

    #[test]
    fn unsigned_values() {
        let mut dec = Decoder::from_slice(&[0x41, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(dec.read_unsigned32(tag::application::COUNTER32).unwrap(), u32::MAX);

        let mut dec = Decoder::from_slice(&[0x41, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert!(dec.read_unsigned32(tag::application::COUNTER32).is_err());

        let mut dec = Decoder::from_slice(&[
            0x46, 0x09, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        ]);
        assert_eq!(dec.read_counter64().unwrap(), u64::MAX);
    }

    #[test]
    fn null_and_octet_string() {
        Decoder::from_slice(&[0x05, 0x00]).read_null().unwrap();
        assert!(Decoder::from_slice(&[0x05, 0x01, 0x00]).read_null().is_err());

        let mut dec = Decoder::from_slice(&[0x04, 0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(&dec.read_octet_string().unwrap()[..], b"hello");
    }

    #[test]
    fn constructed_octet_string_rejected() {
        let mut dec = Decoder::from_slice(&[0x24, 0x03, 0x04, 0x01, 0x41]);
        assert_eq!(category(dec.read_octet_string().unwrap_err()), DecodeError::UnknownTag);
    }

    #[test]
    fn oid() {
        let mut dec = Decoder::from_slice(&[0x06, 0x03, 0x2B, 0x06, 0x01]);
        assert_eq!(dec.read_oid().unwrap().arcs(), &[1, 3, 6, 1]);
    }

    #[test]
    fn sequence_nesting_reports_absolute_offsets() {
        // SEQUENCE { INTEGER 1, <truncated INTEGER> }
        let mut dec = Decoder::from_slice(&[0x30, 0x05, 0x02, 0x01, 0x01, 0x02, 0x04]);
        let mut seq = dec.read_sequence().unwrap();
        assert_eq!(seq.read_integer().unwrap(), 1);
        match seq.read_integer().unwrap_err() {
            Error::Malformed { offset, kind, .. } => {
                assert_eq!(offset, 7);
                assert_eq!(kind.category(), DecodeError::Truncated);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_tag() {
        let mut dec = Decoder::from_slice(&[0x04, 0x00]);
        let err = dec.read_integer().unwrap_err();
        assert_eq!(category(err), DecodeError::UnknownTag);
        // failed expect_tag does not consume the tag
        assert_eq!(dec.peek_tag(), Some(0x04));
    }

    #[test]
    fn read_bytes_past_end_is_truncated() {
        let mut dec = Decoder::from_slice(&[0x01, 0x02, 0x03]);
        assert_eq!(category(dec.read_bytes(100).unwrap_err()), DecodeError::Truncated);
        let mut dec = Decoder::from_slice(&[0x04, 0x82, 0x01, 0x00, 0xAA]);
        assert_eq!(category(dec.skip_tlv().unwrap_err()), DecodeError::Truncated);
    }

    #[test]
    fn finish_detects_leftover_content() {
        let mut dec = Decoder::from_slice(&[0x30, 0x04, 0x05, 0x00, 0x05, 0x00]);
        let mut seq = dec.read_sequence().unwrap();
        seq.read_null().unwrap();
        assert_eq!(category(seq.finish().unwrap_err()), DecodeError::MalformedLength);
        seq.read_null().unwrap();
        seq.finish().unwrap();
    }

    #[test]
    fn message_sequence_must_span_input() {
        let ok = Bytes::from_static(&[0x30, 0x02, 0x05, 0x00]);
        assert!(decode_message_sequence(ok).is_ok());

        let trailing = Bytes::from_static(&[0x30, 0x02, 0x05, 0x00, 0xFF]);
        assert_eq!(
            category(decode_message_sequence(trailing).unwrap_err()),
            DecodeError::MalformedLength
        );

        let short = Bytes::from_static(&[0x30, 0x05, 0x05, 0x00]);
        assert_eq!(
            category(decode_message_sequence(short).unwrap_err()),
            DecodeError::Truncated
        );

        assert_eq!(
            category(decode_message_sequence(Bytes::new()).unwrap_err()),
            DecodeError::Truncated
        );
    }
}
