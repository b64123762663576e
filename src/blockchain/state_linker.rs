use std::collections::BTreeMap;

use super::Sha256Hash;
use crate::codec::{CodecError, Encodable, Entry};
use crate::wallet::PublicKey;

/// Per-block index threading a doubly linked list through the chain for
/// every account the block touches.
///
/// `previous_change[pk]` names the nearest ancestor that also touched `pk`
/// (or the genesis sentinel), `next_change[pk]` the nearest descendant on the
/// best chain once one has been connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateLinker {
    block_hash: Sha256Hash,
    previous_change: BTreeMap<PublicKey, Sha256Hash>,
    next_change: BTreeMap<PublicKey, Sha256Hash>,
}

impl StateLinker {
    pub fn new(block_hash: Sha256Hash) -> Self {
        Self {
            block_hash,
            ..Self::default()
        }
    }

    pub fn from_entry(e: &Entry) -> Self {
        Self {
            block_hash: e.bytes_at("h").map(Sha256Hash::from_slice).unwrap_or_default(),
            previous_change: read_links(e.find_key("p")),
            next_change: read_links(e.find_key("n")),
        }
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    pub fn block_hash(&self) -> &Sha256Hash {
        &self.block_hash
    }

    pub fn previous_change(&self, pk: &PublicKey) -> Option<&Sha256Hash> {
        self.previous_change.get(pk)
    }

    pub fn next_change(&self, pk: &PublicKey) -> Option<&Sha256Hash> {
        self.next_change.get(pk)
    }

    pub fn previous_changes(&self) -> &BTreeMap<PublicKey, Sha256Hash> {
        &self.previous_change
    }

    pub fn next_changes(&self) -> &BTreeMap<PublicKey, Sha256Hash> {
        &self.next_change
    }

    pub fn update_previous_change(&mut self, pk: PublicKey, hash: Sha256Hash) {
        self.previous_change.insert(pk, hash);
    }

    pub fn update_next_change(&mut self, pk: PublicKey, hash: Sha256Hash) {
        self.next_change.insert(pk, hash);
    }

    pub fn clear_next_change(&mut self, pk: &PublicKey) -> Option<Sha256Hash> {
        self.next_change.remove(pk)
    }

    pub fn clear_previous_change(&mut self, pk: &PublicKey) -> Option<Sha256Hash> {
        self.previous_change.remove(pk)
    }
}

// A link map is stored as a list of [pubkey, hash] pairs.
fn read_links(e: Option<&Entry>) -> BTreeMap<PublicKey, Sha256Hash> {
    let mut links = BTreeMap::new();
    for pair in e.and_then(Entry::as_list).unwrap_or_default() {
        if let Some([pk, hash]) = pair.as_list() {
            if let (Some(pk), Some(hash)) = (pk.as_bytes(), hash.as_bytes()) {
                links.insert(PublicKey::from_slice(pk), Sha256Hash::from_slice(hash));
            }
        }
    }
    links
}

fn write_links(links: &BTreeMap<PublicKey, Sha256Hash>) -> Entry {
    Entry::List(
        links
            .iter()
            .map(|(pk, hash)| {
                Entry::List(vec![
                    Entry::Bytes(pk.as_bytes().to_vec()),
                    Entry::Bytes(hash.as_bytes().to_vec()),
                ])
            })
            .collect(),
    )
}

impl Encodable for StateLinker {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("h", Entry::Bytes(self.block_hash.as_bytes().to_vec()));
        e.insert("p", write_links(&self.previous_change));
        e.insert("n", write_links(&self.next_change));
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_survive_encoding() {
        let mut linker = StateLinker::new(Sha256Hash::digest(b"b2"));
        let a = PublicKey([1u8; 32]);
        let b = PublicKey([2u8; 32]);
        linker.update_previous_change(a, Sha256Hash::GENESIS_SENTINEL);
        linker.update_previous_change(b, Sha256Hash::digest(b"b1"));
        linker.update_next_change(a, Sha256Hash::digest(b"b3"));

        let back = StateLinker::from_encode(&linker.get_encode()).unwrap();
        assert_eq!(back, linker);
        assert_eq!(back.previous_change(&a), Some(&Sha256Hash::GENESIS_SENTINEL));
        assert_eq!(back.next_change(&b), None);
    }

    #[test]
    fn clearing_next_change_reopens_history() {
        let a = PublicKey([1u8; 32]);
        let mut linker = StateLinker::new(Sha256Hash::digest(b"b1"));
        linker.update_next_change(a, Sha256Hash::digest(b"b2"));
        assert!(linker.clear_next_change(&a).is_some());
        assert!(linker.next_change(&a).is_none());
    }
}
