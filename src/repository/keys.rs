//! Storage key layout shared by every repository implementation.
//!
//! A key is a short table prefix followed by length-delimited parts, so no
//! two (table, parts) combinations can encode to the same bytes.

use crate::blockchain::Sha256Hash;
use crate::wallet::PublicKey;

const BLOCK: &[u8] = b"blk";
const STATE_LINKER: &[u8] = b"lnk";
const BEST_TIP: &[u8] = b"tip";
const BEST_TAIL: &[u8] = b"tail";
const ACCOUNT_POINTER: &[u8] = b"acc";
const INDEX_INFO: &[u8] = b"idx";
const CHAINS: &[u8] = b"chains";

fn compose(table: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = table.len() + parts.iter().map(|p| p.len() + 4).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(table);
    for part in parts {
        key.extend_from_slice(&(part.len() as u32).to_be_bytes());
        key.extend_from_slice(part);
    }
    key
}

pub fn block(hash: &Sha256Hash) -> Vec<u8> {
    compose(BLOCK, &[hash.as_bytes()])
}

pub fn state_linker(hash: &Sha256Hash) -> Vec<u8> {
    compose(STATE_LINKER, &[hash.as_bytes()])
}

pub fn best_tip(chain_id: &[u8]) -> Vec<u8> {
    compose(BEST_TIP, &[chain_id])
}

pub fn best_tail(chain_id: &[u8]) -> Vec<u8> {
    compose(BEST_TAIL, &[chain_id])
}

pub fn account_block_pointer(chain_id: &[u8], pk: &PublicKey) -> Vec<u8> {
    compose(ACCOUNT_POINTER, &[chain_id, pk.as_bytes()])
}

/// Heights are big-endian so a chain's index sorts by height.
pub fn index_info(chain_id: &[u8], block_number: i64) -> Vec<u8> {
    compose(INDEX_INFO, &[chain_id, &block_number.to_be_bytes()])
}

pub fn chains() -> Vec<u8> {
    compose(CHAINS, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_do_not_run_together() {
        let a = compose(ACCOUNT_POINTER, &[b"ab", b"c"]);
        let b = compose(ACCOUNT_POINTER, &[b"a", b"bc"]);
        assert_ne!(a, b);
        assert_ne!(best_tip(b"x"), best_tail(b"x"));
    }
}
