use super::Sha256Hash;
use crate::codec::{Encodable, Entry, le_i64, read_le_i64};

/// A peer's view of the block it considers the best tip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vote {
    pub block_hash: Sha256Hash,
    pub block_number: i64,
}

impl Vote {
    pub fn new(block_hash: Sha256Hash, block_number: i64) -> Self {
        Self {
            block_hash,
            block_number,
        }
    }

    pub fn from_entry(e: &Entry) -> Self {
        Self {
            block_hash: e.bytes_at("h").map(Sha256Hash::from_slice).unwrap_or_default(),
            block_number: e.bytes_at("n").map(read_le_i64).unwrap_or_default(),
        }
    }
}

impl Encodable for Vote {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("h", Entry::Bytes(self.block_hash.as_bytes().to_vec()));
        e.insert("n", le_i64(self.block_number));
        e
    }
}
