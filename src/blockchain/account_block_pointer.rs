use super::Sha256Hash;
use crate::codec::{CodecError, Encodable, Entry};

/// Fast path from an account to the newest and oldest retained blocks that
/// carry its state on the best chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountBlockPointer {
    latest_block_hash: Sha256Hash,
    oldest_block_hash: Sha256Hash,
}

impl AccountBlockPointer {
    pub fn new(latest_block_hash: Sha256Hash, oldest_block_hash: Sha256Hash) -> Self {
        Self {
            latest_block_hash,
            oldest_block_hash,
        }
    }

    pub fn from_entry(e: &Entry) -> Self {
        Self {
            latest_block_hash: e.bytes_at("l").map(Sha256Hash::from_slice).unwrap_or_default(),
            oldest_block_hash: e.bytes_at("o").map(Sha256Hash::from_slice).unwrap_or_default(),
        }
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    pub fn latest_block_hash(&self) -> &Sha256Hash {
        &self.latest_block_hash
    }

    pub fn set_latest_block_hash(&mut self, hash: Sha256Hash) {
        self.latest_block_hash = hash;
    }

    pub fn oldest_block_hash(&self) -> &Sha256Hash {
        &self.oldest_block_hash
    }

    pub fn set_oldest_block_hash(&mut self, hash: Sha256Hash) {
        self.oldest_block_hash = hash;
    }
}

impl Encodable for AccountBlockPointer {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("l", Entry::Bytes(self.latest_block_hash.as_bytes().to_vec()));
        e.insert("o", Entry::Bytes(self.oldest_block_hash.as_bytes().to_vec()));
        e
    }
}
