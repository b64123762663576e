use std::collections::BTreeSet;

use super::Sha256Hash;
use crate::codec::{CodecError, Encodable, Entry};

/// Blocks known at one (chain, height): the best-chain block, if any, and
/// the competing fork blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexKeyInfo {
    main_chain_block_hash: Option<Sha256Hash>,
    non_main_chain_block_hashes: BTreeSet<Sha256Hash>,
}

impl IndexKeyInfo {
    pub fn from_entry(e: &Entry) -> Self {
        let non_main = e
            .find_key("n")
            .and_then(Entry::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(Entry::as_bytes)
            .map(Sha256Hash::from_slice)
            .collect();
        Self {
            main_chain_block_hash: e.bytes_at("m").map(Sha256Hash::from_slice),
            non_main_chain_block_hashes: non_main,
        }
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    pub fn main_chain_block_hash(&self) -> Option<&Sha256Hash> {
        self.main_chain_block_hash.as_ref()
    }

    pub fn non_main_chain_block_hashes(&self) -> &BTreeSet<Sha256Hash> {
        &self.non_main_chain_block_hashes
    }

    pub fn is_empty(&self) -> bool {
        self.main_chain_block_hash.is_none() && self.non_main_chain_block_hashes.is_empty()
    }

    /// Promote `hash` to the best chain. A previous main block at this height
    /// becomes a fork block.
    pub fn set_main_chain_block_hash(&mut self, hash: Sha256Hash) {
        if let Some(old) = self.main_chain_block_hash.replace(hash) {
            if old != hash {
                self.non_main_chain_block_hashes.insert(old);
            }
        }
        self.non_main_chain_block_hashes.remove(&hash);
    }

    /// Demote the main block at this height, if it is `hash`.
    pub fn detach_main_chain_block_hash(&mut self, hash: &Sha256Hash) -> bool {
        if self.main_chain_block_hash.as_ref() == Some(hash) {
            self.main_chain_block_hash = None;
            self.non_main_chain_block_hashes.insert(*hash);
            return true;
        }
        false
    }

    pub fn add_non_main_chain_block_hash(&mut self, hash: Sha256Hash) {
        if self.main_chain_block_hash != Some(hash) {
            self.non_main_chain_block_hashes.insert(hash);
        }
    }

    pub fn remove_block_hash(&mut self, hash: &Sha256Hash) {
        if self.main_chain_block_hash.as_ref() == Some(hash) {
            self.main_chain_block_hash = None;
        }
        self.non_main_chain_block_hashes.remove(hash);
    }

    /// Every block hash recorded at this height.
    pub fn all_block_hashes(&self) -> impl Iterator<Item = &Sha256Hash> {
        self.main_chain_block_hash
            .iter()
            .chain(self.non_main_chain_block_hashes.iter())
    }
}

impl Encodable for IndexKeyInfo {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        if let Some(hash) = &self.main_chain_block_hash {
            e.insert("m", Entry::Bytes(hash.as_bytes().to_vec()));
        }
        e.insert(
            "n",
            Entry::List(
                self.non_main_chain_block_hashes
                    .iter()
                    .map(|h| Entry::Bytes(h.as_bytes().to_vec()))
                    .collect(),
            ),
        );
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_demotes_the_old_main_block() {
        let (a, b) = (Sha256Hash::digest(b"a"), Sha256Hash::digest(b"b"));
        let mut info = IndexKeyInfo::default();
        info.add_non_main_chain_block_hash(b);
        info.set_main_chain_block_hash(a);
        info.set_main_chain_block_hash(b);
        assert_eq!(info.main_chain_block_hash(), Some(&b));
        assert!(info.non_main_chain_block_hashes().contains(&a));
        assert!(!info.non_main_chain_block_hashes().contains(&b));

        let back = IndexKeyInfo::from_encode(&info.get_encode()).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn detach_keeps_block_as_fork() {
        let a = Sha256Hash::digest(b"a");
        let mut info = IndexKeyInfo::default();
        info.set_main_chain_block_hash(a);
        assert!(info.detach_main_chain_block_hash(&a));
        assert!(info.main_chain_block_hash().is_none());
        assert_eq!(info.all_block_hashes().count(), 1);
        info.remove_block_hash(&a);
        assert!(info.is_empty());
    }
}
