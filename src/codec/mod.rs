pub mod entry;

pub use entry::{Entry, EntryDict};

use thiserror::Error;

/// Structural failures while reading the canonical byte form.
///
/// Missing or short fields are not errors: domain types fall back to the
/// type default so that older and newer peers can still read each other.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("invalid integer at offset {0}")]
    InvalidInteger(usize),
    #[error("invalid string length at offset {0}")]
    InvalidLength(usize),
    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },
    #[error("dictionary key is not valid utf-8 at offset {0}")]
    InvalidKey(usize),
    #[error("{0} trailing bytes after entry")]
    TrailingBytes(usize),
    #[error("expected a dictionary entry")]
    NotADictionary,
    #[error("nesting deeper than {0} levels at offset {1}")]
    TooDeep(usize, usize),
}

/// Types that have a canonical entry form.
pub trait Encodable {
    /// Returns the corresponding entry.
    fn get_entry(&self) -> Entry;

    /// Canonical bytes used for hashing, signing and storage.
    fn get_encode(&self) -> Vec<u8> {
        self.get_entry().encode()
    }
}

/// Fixed-width little-endian form of a 64-bit number.
pub fn le_i64(value: i64) -> Entry {
    Entry::Bytes(value.to_le_bytes().to_vec())
}

/// Fixed-width little-endian form of an unsigned 64-bit number.
pub fn le_u64(value: u64) -> Entry {
    Entry::Bytes(value.to_le_bytes().to_vec())
}

/// Fixed-width little-endian form of a 32-bit number (versions, type tags).
pub fn le_i32(value: i32) -> Entry {
    Entry::Bytes(value.to_le_bytes().to_vec())
}

pub fn read_le_i64(bytes: &[u8]) -> i64 {
    i64::from_le_bytes(pad::<8>(bytes))
}

pub fn read_le_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(pad::<8>(bytes))
}

pub fn read_le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes(pad::<4>(bytes))
}

// Short inputs are zero-extended, long ones truncated.
fn pad<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Copies `bytes` into a fixed array, or returns the zero array when the
/// length does not match.
pub fn fixed_bytes<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    if bytes.len() == N {
        out.copy_from_slice(bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_is_fixed_width() {
        assert_eq!(le_i64(1), Entry::Bytes(vec![1, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(le_i32(-1), Entry::Bytes(vec![0xff; 4]));
        assert_eq!(read_le_i64(&(-101i64).to_le_bytes()), -101);
    }

    #[test]
    fn short_input_is_zero_extended() {
        assert_eq!(read_le_i64(&[0x2a]), 42);
        assert_eq!(read_le_i32(&[]), 0);
        assert_eq!(fixed_bytes::<4>(&[1, 2, 3]), [0u8; 4]);
    }
}
