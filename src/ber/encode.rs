//! BER encoding.
//!
//! Uses a reverse buffer: content is written first, then its length and tag
//! are prepended, so no length needs to be known in advance. Callers push
//! the fields of a constructed value in reverse order.

use super::length::encode_length;
use super::tag;
use crate::oid::Oid;
use bytes::Bytes;

/// Buffer for BER encoding that writes backwards.
pub struct EncodeBuf {
    buf: Vec<u8>,
}

impl EncodeBuf {
    /// Create a new encode buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    /// Create a new encode buffer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Prepend a single byte.
    pub fn push_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Prepend bytes that are given in forward order.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().rev());
    }

    /// Prepend a BER length.
    pub fn push_length(&mut self, len: usize) {
        let (bytes, count) = encode_length(len);
        self.buf.extend_from_slice(&bytes[..count]);
    }

    /// Prepend a BER tag.
    pub fn push_tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a constructed value (SEQUENCE, PDU, ...).
    ///
    /// The closure writes the contents, which are then wrapped with length and tag.
    pub fn push_constructed<F>(&mut self, tag: u8, f: F)
    where
        F: FnOnce(&mut Self),
    {
        let start_len = self.len();
        f(self);
        let content_len = self.len() - start_len;
        self.push_length(content_len);
        self.push_tag(tag);
    }

    /// Encode a SEQUENCE.
    pub fn push_sequence<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.push_constructed(tag::universal::SEQUENCE, f);
    }

    /// Encode a primitive TLV from forward-ordered content.
    fn push_primitive(&mut self, tag: u8, content: &[u8]) {
        self.push_bytes(content);
        self.push_length(content.len());
        self.push_tag(tag);
    }

    /// Encode an INTEGER in minimal two's-complement form.
    pub fn push_integer(&mut self, value: i32) {
        let bytes = value.to_be_bytes();
        let start = minimal_signed_start(&bytes);
        self.push_primitive(tag::universal::INTEGER, &bytes[start..]);
    }

    /// Encode an unsigned 32-bit value with the given tag.
    ///
    /// A leading zero octet is added when the high bit is set, so the value
    /// never reads back as negative.
    pub fn push_unsigned32(&mut self, tag: u8, value: u32) {
        let mut bytes = [0u8; 5];
        bytes[1..].copy_from_slice(&value.to_be_bytes());
        let start = minimal_unsigned_start(&bytes);
        self.push_primitive(tag, &bytes[start..]);
    }

    /// Encode a Counter64.
    pub fn push_counter64(&mut self, value: u64) {
        let mut bytes = [0u8; 9];
        bytes[1..].copy_from_slice(&value.to_be_bytes());
        let start = minimal_unsigned_start(&bytes);
        self.push_primitive(tag::application::COUNTER64, &bytes[start..]);
    }

    /// Encode an OCTET STRING.
    pub fn push_octet_string(&mut self, data: &[u8]) {
        self.push_primitive(tag::universal::OCTET_STRING, data);
    }

    /// Encode a NULL.
    pub fn push_null(&mut self) {
        self.push_primitive(tag::universal::NULL, &[]);
    }

    /// Encode an OBJECT IDENTIFIER.
    pub fn push_oid(&mut self, oid: &Oid) {
        let ber = oid.to_ber_smallvec();
        self.push_primitive(tag::universal::OBJECT_IDENTIFIER, &ber);
    }

    /// Encode an IpAddress.
    pub fn push_ip_address(&mut self, addr: [u8; 4]) {
        self.push_primitive(tag::application::IP_ADDRESS, &addr);
    }

    /// Encode a zero-length value with the given tag (exception markers).
    pub fn push_empty(&mut self, tag: u8) {
        self.push_primitive(tag, &[]);
    }

    /// Encode opaque content with an arbitrary primitive tag.
    pub fn push_tagged_bytes(&mut self, tag: u8, data: &[u8]) {
        self.push_primitive(tag, data);
    }

    /// Finalize and return the encoded bytes.
    pub fn finish(mut self) -> Bytes {
        self.buf.reverse();
        Bytes::from(self.buf)
    }

    /// Finalize and return as `Vec<u8>`.
    pub fn finish_vec(mut self) -> Vec<u8> {
        self.buf.reverse();
        self.buf
    }
}

impl Default for EncodeBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the first octet of the minimal two's-complement form.
#[inline]
fn minimal_signed_start(bytes: &[u8]) -> usize {
    let mut start = 0;
    while start + 1 < bytes.len() {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    start
}

/// Like [`minimal_signed_start`], for a big-endian unsigned value with a
/// spare leading zero octet.
#[inline]
fn minimal_unsigned_start(bytes: &[u8]) -> usize {
    let mut start = 0;
    while start + 1 < bytes.len() && bytes[start] == 0 && bytes[start + 1] & 0x80 == 0 {
        start += 1;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integer(value: i32) -> Vec<u8> {
        let mut buf = EncodeBuf::new();
        buf.push_integer(value);
        buf.finish_vec()[2..].to_vec()
    }

    fn unsigned(value: u32) -> Vec<u8> {
        let mut buf = EncodeBuf::new();
        buf.push_unsigned32(tag::application::GAUGE32, value);
        buf.finish_vec()[2..].to_vec()
    }

    #[test]
    fn integers_are_minimal() {
        assert_eq!(integer(0), vec![0]);
        assert_eq!(integer(1), vec![1]);
        assert_eq!(integer(127), vec![127]);
        assert_eq!(integer(128), vec![0, 128]);
        assert_eq!(integer(256), vec![1, 0]);
        assert_eq!(integer(-1), vec![0xFF]);
        assert_eq!(integer(-128), vec![0x80]);
        assert_eq!(integer(-129), vec![0xFF, 0x7F]);
        assert_eq!(integer(i32::MAX), vec![0x7F, 0xFF, 0xFF, 0xFF]);
        assert_eq!(integer(i32::MIN), vec![0x80, 0, 0, 0]);
    }

    #[test]
    fn unsigned_gets_leading_zero_when_high_bit_set() {
        assert_eq!(unsigned(0), vec![0]);
        assert_eq!(unsigned(127), vec![127]);
        assert_eq!(unsigned(128), vec![0, 128]);
        assert_eq!(unsigned(256), vec![1, 0]);
        assert_eq!(unsigned(u32::MAX), vec![0, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn counter64_encoding() {
        let mut buf = EncodeBuf::new();
        buf.push_counter64(u64::MAX);
        assert_eq!(
            buf.finish_vec(),
            vec![0x46, 0x09, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        let mut buf = EncodeBuf::new();
        buf.push_counter64(0);
        assert_eq!(buf.finish_vec(), vec![0x46, 0x01, 0x00]);
    }

    #[test]
    fn null_and_integer_tlv() {
        let mut buf = EncodeBuf::new();
        buf.push_null();
        assert_eq!(&buf.finish()[..], &[0x05, 0x00]);

        let mut buf = EncodeBuf::new();
        buf.push_integer(42);
        assert_eq!(&buf.finish()[..], &[0x02, 0x01, 0x2A]);
    }

    #[test]
    fn sequence_fields_pushed_in_reverse() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_integer(2);
            buf.push_integer(1);
        });
        assert_eq!(
            &buf.finish()[..],
            &[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]
        );
    }

    #[test]
    fn long_content_uses_long_form_length() {
        let data = vec![0xAB; 200];
        let mut buf = EncodeBuf::new();
        buf.push_octet_string(&data);
        let out = buf.finish_vec();
        assert_eq!(&out[..3], &[0x04, 0x81, 200]);
        assert_eq!(out.len(), 203);
    }
}
