//! Recursive length-prefix encoding of byte strings and lists.
//!
//! A single byte below 0x80 encodes itself. Byte strings carry a 0x80-based
//! prefix, lists a 0xc0-based prefix; payloads longer than 55 bytes switch to
//! the long form where the prefix (0xb7/0xf7 based) counts the length bytes.
//! Identical inputs always produce identical bytes, which is what makes the
//! transaction/receipt/header roots and hashes deterministic.

use primitive_types::U256;
use thiserror::Error;

// Prefix bases for the short and long encodings
const STRING_OFFSET: u8 = 0x80;
const STRING_LONG_OFFSET: u8 = 0xb7;
const LIST_OFFSET: u8 = 0xc0;
const LIST_LONG_OFFSET: u8 = 0xf7;

// Payloads up to this many bytes use the short prefix form
const SHORT_PAYLOAD_MAX: usize = 55;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ReaderError {
    #[error("Unexpected end of input")]
    UnexpectedEnd,

    #[error("Expected a byte string, found a list")]
    UnexpectedList,

    #[error("Expected a list, found a byte string")]
    UnexpectedString,

    #[error("Non-canonical encoding")]
    NonCanonical,

    #[error("Invalid payload size")]
    InvalidSize,

    #[error("Trailing bytes after item")]
    TrailingBytes,
}

/// Append the prefix for a payload of `len` bytes at base `offset`.
fn write_length(len: usize, offset: u8, out: &mut Vec<u8>) {
    if len <= SHORT_PAYLOAD_MAX {
        out.push(offset + len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let start = len_bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(len_bytes.len());
        let trimmed = &len_bytes[start..];
        out.push(STRING_LONG_OFFSET - STRING_OFFSET + offset + trimmed.len() as u8);
        out.extend_from_slice(trimmed);
    }
}

/// Serializes items into the canonical byte form.
pub struct Writer {
    out: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { out: Vec::new() }
    }

    // A byte string item
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() == 1 && bytes[0] < STRING_OFFSET {
            self.out.push(bytes[0]);
        } else {
            write_length(bytes.len(), STRING_OFFSET, &mut self.out);
            self.out.extend_from_slice(bytes);
        }
    }

    // An unsigned integer as its minimal big-endian bytes (zero = empty string)
    pub fn write_u64(&mut self, value: u64) {
        let bytes = value.to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        self.write_bytes(&bytes[start..]);
    }

    pub fn write_uint(&mut self, value: U256) {
        let bytes: [u8; 32] = value.to_big_endian();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        self.write_bytes(&bytes[start..]);
    }

    // A list item whose payload is produced by the closure
    pub fn write_list<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Writer),
    {
        let mut inner = Writer::new();
        f(&mut inner);
        let payload = inner.finish();
        write_length(payload.len(), LIST_OFFSET, &mut self.out);
        self.out.extend_from_slice(&payload);
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses items back out of the canonical byte form.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

// Decoded item header: payload bounds plus whether the item is a list
struct ItemHeader {
    start: usize,
    len: usize,
    is_list: bool,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn has_more(&self) -> bool {
        self.pos < self.bytes.len()
    }

    fn peek_header(&self) -> Result<ItemHeader, ReaderError> {
        let first = *self.bytes.get(self.pos).ok_or(ReaderError::UnexpectedEnd)?;
        let (offset, is_list) = if first < LIST_OFFSET {
            (STRING_OFFSET, false)
        } else {
            (LIST_OFFSET, true)
        };

        if !is_list && first < STRING_OFFSET {
            // single byte encodes itself
            return Ok(ItemHeader {
                start: self.pos,
                len: 1,
                is_list: false,
            });
        }

        let long_offset = offset + (STRING_LONG_OFFSET - STRING_OFFSET);
        if first <= long_offset {
            // short form: prefix encodes the payload length directly
            let len = (first - offset) as usize;
            let start = self.pos + 1;
            if start + len > self.bytes.len() {
                return Err(ReaderError::UnexpectedEnd);
            }
            // a one-byte payload below 0x80 must have been self-encoded
            if !is_list && len == 1 && self.bytes[start] < STRING_OFFSET {
                return Err(ReaderError::NonCanonical);
            }
            Ok(ItemHeader { start, len, is_list })
        } else {
            // long form: prefix counts the length bytes
            let len_of_len = (first - long_offset) as usize;
            if len_of_len > 8 {
                return Err(ReaderError::InvalidSize);
            }
            let len_start = self.pos + 1;
            if len_start + len_of_len > self.bytes.len() {
                return Err(ReaderError::UnexpectedEnd);
            }
            let len_bytes = &self.bytes[len_start..len_start + len_of_len];
            if len_bytes.first() == Some(&0) {
                return Err(ReaderError::NonCanonical);
            }
            let mut len: usize = 0;
            for b in len_bytes {
                len = len
                    .checked_mul(256)
                    .and_then(|l| l.checked_add(*b as usize))
                    .ok_or(ReaderError::InvalidSize)?;
            }
            if len <= SHORT_PAYLOAD_MAX {
                return Err(ReaderError::NonCanonical);
            }
            let start = len_start + len_of_len;
            if start + len > self.bytes.len() {
                return Err(ReaderError::UnexpectedEnd);
            }
            Ok(ItemHeader { start, len, is_list })
        }
    }

    /// Read the next item as a byte string.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let header = self.peek_header()?;
        if header.is_list {
            return Err(ReaderError::UnexpectedList);
        }
        let payload = &self.bytes[header.start..header.start + header.len];
        self.pos = header.start + header.len;
        Ok(payload.to_vec())
    }

    /// Read the next item as an unsigned integer (minimal big-endian bytes).
    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes = self.read_bytes()?;
        if bytes.len() > 8 {
            return Err(ReaderError::InvalidSize);
        }
        if bytes.first() == Some(&0) {
            return Err(ReaderError::NonCanonical);
        }
        let mut value: u64 = 0;
        for b in &bytes {
            value = (value << 8) | *b as u64;
        }
        Ok(value)
    }

    pub fn read_uint(&mut self) -> Result<U256, ReaderError> {
        let bytes = self.read_bytes()?;
        if bytes.len() > 32 {
            return Err(ReaderError::InvalidSize);
        }
        if bytes.first() == Some(&0) {
            return Err(ReaderError::NonCanonical);
        }
        Ok(U256::from_big_endian(&bytes))
    }

    /// Read the next item as a list, returning a reader over its payload.
    pub fn read_list(&mut self) -> Result<Reader<'a>, ReaderError> {
        let header = self.peek_header()?;
        if !header.is_list {
            return Err(ReaderError::UnexpectedString);
        }
        let payload = &self.bytes[header.start..header.start + header.len];
        self.pos = header.start + header.len;
        Ok(Reader::new(payload))
    }

    /// Fail if the reader has unconsumed bytes.
    pub fn expect_end(&self) -> Result<(), ReaderError> {
        if self.has_more() {
            Err(ReaderError::TrailingBytes)
        } else {
            Ok(())
        }
    }
}

pub trait Encodable {
    fn encode(&self, writer: &mut Writer);

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.encode(&mut writer);
        writer.finish()
    }
}

pub trait Decodable: Sized {
    fn decode(reader: &mut Reader) -> Result<Self, ReaderError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.expect_end()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(bytes);
        w.finish()
    }

    #[test]
    fn test_single_byte_encodes_itself() {
        assert_eq!(encode_bytes(&[0x05]), vec![0x05]);
        assert_eq!(encode_bytes(&[0x7f]), vec![0x7f]);
        // 0x80 needs a prefix
        assert_eq!(encode_bytes(&[0x80]), vec![0x81, 0x80]);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(encode_bytes(&[]), vec![0x80]);
        let mut r = Reader::new(&[0x80]);
        assert_eq!(r.read_bytes().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_short_and_long_strings() {
        let short = vec![0xaa; 55];
        let encoded = encode_bytes(&short);
        assert_eq!(encoded[0], 0x80 + 55);

        let long = vec![0xbb; 56];
        let encoded = encode_bytes(&long);
        assert_eq!(encoded[0], 0xb7 + 1);
        assert_eq!(encoded[1], 56);

        let mut r = Reader::new(&encoded);
        assert_eq!(r.read_bytes().unwrap(), long);
    }

    #[test]
    fn test_integers_are_minimal() {
        let mut w = Writer::new();
        w.write_u64(0);
        assert_eq!(w.finish(), vec![0x80]);

        let mut w = Writer::new();
        w.write_u64(0x0400);
        assert_eq!(w.finish(), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn test_list_roundtrip() {
        let mut w = Writer::new();
        w.write_list(|w| {
            w.write_u64(1);
            w.write_bytes(b"cat");
            w.write_list(|w| w.write_u64(2));
        });
        let encoded = w.finish();

        let mut r = Reader::new(&encoded);
        let mut list = r.read_list().unwrap();
        assert_eq!(list.read_u64().unwrap(), 1);
        assert_eq!(list.read_bytes().unwrap(), b"cat".to_vec());
        let mut inner = list.read_list().unwrap();
        assert_eq!(inner.read_u64().unwrap(), 2);
        inner.expect_end().unwrap();
        list.expect_end().unwrap();
        r.expect_end().unwrap();
    }

    #[test]
    fn test_rejects_non_canonical_single_byte() {
        // 0x05 must be encoded as itself, not as a one byte string
        let mut r = Reader::new(&[0x81, 0x05]);
        assert_eq!(r.read_bytes(), Err(ReaderError::NonCanonical));
    }

    #[test]
    fn test_rejects_leading_zero_integer() {
        let mut w = Writer::new();
        w.write_bytes(&[0x00, 0x01]);
        let encoded = w.finish();
        let mut r = Reader::new(&encoded);
        assert_eq!(r.read_u64(), Err(ReaderError::NonCanonical));
    }

    #[test]
    fn test_mismatched_item_kind() {
        let mut w = Writer::new();
        w.write_list(|_| {});
        let encoded = w.finish();
        let mut r = Reader::new(&encoded);
        assert_eq!(r.read_bytes(), Err(ReaderError::UnexpectedList));

        let encoded = encode_bytes(b"dog");
        let mut r = Reader::new(&encoded);
        assert!(matches!(r.read_list(), Err(ReaderError::UnexpectedString)));
    }

    proptest! {
        #[test]
        fn prop_bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode_bytes(&data);
            let mut r = Reader::new(&encoded);
            prop_assert_eq!(r.read_bytes().unwrap(), data);
            prop_assert!(!r.has_more());
        }

        #[test]
        fn prop_u64_roundtrip(value in any::<u64>()) {
            let mut w = Writer::new();
            w.write_u64(value);
            let encoded = w.finish();
            let mut r = Reader::new(&encoded);
            prop_assert_eq!(r.read_u64().unwrap(), value);
        }
    }
}
