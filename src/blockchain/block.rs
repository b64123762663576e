use std::fmt;

use log::warn;

use super::{Account, Sha256Hash};
use crate::codec::{
    CodecError, Encodable, Entry, le_i32, le_i64, le_u64, read_le_i32, read_le_i64, read_le_u64,
};
use crate::transaction::Transaction;
use crate::wallet::{PublicKey, SecretKey, Signature, ed25519_sign, ed25519_verify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVersion {
    V1,
    Unknown(i32),
}

impl BlockVersion {
    pub fn id(self) -> i32 {
        match self {
            BlockVersion::V1 => 0,
            BlockVersion::Unknown(v) => v,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            0 => BlockVersion::V1,
            v => BlockVersion::Unknown(v),
        }
    }
}

/// A block on one chain: header, the single embedded transaction, and the
/// post-transaction state of miner, sender and receiver.
///
/// Carrying the three snapshots in-line makes each block self-contained for
/// state reconstruction. Blocks are immutable once built; consensus changes
/// produce new blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    version: BlockVersion,
    chain_id: Vec<u8>,
    timestamp: i64,
    block_number: i64,
    previous_block_root: Sha256Hash,
    base_target: u64,
    cumulative_difficulty: u64,
    generation_signature: Sha256Hash,
    tx: Transaction,
    miner: PublicKey,
    miner_balance: i64,
    miner_nonce: i64,
    sender_balance: i64,
    sender_nonce: i64,
    receiver_balance: i64,
    receiver_nonce: i64,
    signature: Signature,
    hash: Sha256Hash,
}

/// Post-transaction balance and nonce of the three accounts a block names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostStates {
    pub miner_balance: i64,
    pub miner_nonce: i64,
    pub sender_balance: i64,
    pub sender_nonce: i64,
    pub receiver_balance: i64,
    pub receiver_nonce: i64,
}

impl Block {
    /// Assemble an unsigned block. Call `sign()` before submitting it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: BlockVersion,
        chain_id: Vec<u8>,
        timestamp: i64,
        block_number: i64,
        previous_block_root: Sha256Hash,
        base_target: u64,
        cumulative_difficulty: u64,
        generation_signature: Sha256Hash,
        tx: Transaction,
        miner: PublicKey,
        states: PostStates,
    ) -> Self {
        let mut block = Self {
            version,
            chain_id,
            timestamp,
            block_number,
            previous_block_root,
            base_target,
            cumulative_difficulty,
            generation_signature,
            tx,
            miner,
            miner_balance: states.miner_balance,
            miner_nonce: states.miner_nonce,
            sender_balance: states.sender_balance,
            sender_nonce: states.sender_nonce,
            receiver_balance: states.receiver_balance,
            receiver_nonce: states.receiver_nonce,
            signature: Signature::default(),
            hash: Sha256Hash::default(),
        };
        block.hash = Sha256Hash::digest(&block.get_encode());
        block
    }

    /// Populate from an entry. The hash covers the canonical re-encoding,
    /// so unknown keys and non-canonical field widths do not change it.
    pub fn from_entry(e: &Entry) -> Self {
        let int = |key: &str| e.bytes_at(key).map(read_le_i64).unwrap_or_default();
        let uint = |key: &str| e.bytes_at(key).map(read_le_u64).unwrap_or_default();
        let hash = |key: &str| e.bytes_at(key).map(Sha256Hash::from_slice).unwrap_or_default();
        let mut block = Self {
            version: BlockVersion::from_id(e.bytes_at("v").map(read_le_i32).unwrap_or_default()),
            chain_id: e.bytes_at("i").map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: int("t"),
            block_number: int("n"),
            previous_block_root: hash("h"),
            base_target: uint("b"),
            cumulative_difficulty: uint("d"),
            generation_signature: hash("g"),
            tx: e.find_key("x").map(Transaction::from_entry).unwrap_or_default(),
            miner: e.bytes_at("m").map(PublicKey::from_slice).unwrap_or_default(),
            miner_balance: int("mb"),
            miner_nonce: int("mn"),
            sender_balance: int("sb"),
            sender_nonce: int("sn"),
            receiver_balance: int("rb"),
            receiver_nonce: int("rn"),
            signature: e.bytes_at("sig").map(Signature::from_slice).unwrap_or_default(),
            hash: Sha256Hash::default(),
        };
        block.hash = Sha256Hash::digest(&block.get_encode());
        block
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    pub fn version(&self) -> BlockVersion {
        self.version
    }

    pub fn chain_id(&self) -> &[u8] {
        &self.chain_id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn block_number(&self) -> i64 {
        self.block_number
    }

    pub fn previous_block_root(&self) -> &Sha256Hash {
        &self.previous_block_root
    }

    pub fn base_target(&self) -> u64 {
        self.base_target
    }

    pub fn cumulative_difficulty(&self) -> u64 {
        self.cumulative_difficulty
    }

    pub fn generation_signature(&self) -> &Sha256Hash {
        &self.generation_signature
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn miner(&self) -> &PublicKey {
        &self.miner
    }

    pub fn miner_balance(&self) -> i64 {
        self.miner_balance
    }

    pub fn miner_nonce(&self) -> i64 {
        self.miner_nonce
    }

    pub fn sender_balance(&self) -> i64 {
        self.sender_balance
    }

    pub fn sender_nonce(&self) -> i64 {
        self.sender_nonce
    }

    pub fn receiver_balance(&self) -> i64 {
        self.receiver_balance
    }

    pub fn receiver_nonce(&self) -> i64 {
        self.receiver_nonce
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Hash of the full (signed) encoding.
    pub fn sha256(&self) -> &Sha256Hash {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_block_root.is_all_zeros()
    }

    pub fn get_entry_without_signature(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("v", le_i32(self.version.id()));
        e.insert("i", Entry::Bytes(self.chain_id.clone()));
        e.insert("t", le_i64(self.timestamp));
        e.insert("n", le_i64(self.block_number));
        e.insert("h", Entry::Bytes(self.previous_block_root.as_bytes().to_vec()));
        e.insert("b", le_u64(self.base_target));
        e.insert("d", le_u64(self.cumulative_difficulty));
        e.insert("g", Entry::Bytes(self.generation_signature.as_bytes().to_vec()));
        e.insert("x", self.tx.get_entry());
        e.insert("m", Entry::Bytes(self.miner.as_bytes().to_vec()));
        e.insert("mb", le_i64(self.miner_balance));
        e.insert("mn", le_i64(self.miner_nonce));
        e.insert("sb", le_i64(self.sender_balance));
        e.insert("sn", le_i64(self.sender_nonce));
        e.insert("rb", le_i64(self.receiver_balance));
        e.insert("rn", le_i64(self.receiver_nonce));
        e
    }

    pub fn get_encode_without_signature(&self) -> Vec<u8> {
        self.get_entry_without_signature().encode()
    }

    /// Sign the block as its miner and re-hash the signed encoding.
    pub fn sign(&mut self, pk: &PublicKey, sk: &SecretKey) {
        if *pk != self.miner {
            warn!("signing block with key {} that is not its miner {}", pk, self.miner);
        }
        self.signature = ed25519_sign(&self.get_encode_without_signature(), sk);
        self.hash = Sha256Hash::digest(&self.get_encode());
    }

    pub fn verify_signature(&self) -> bool {
        ed25519_verify(&self.signature, &self.get_encode_without_signature(), &self.miner)
    }

    /// Distinct accounts whose post-state this block carries: the miner
    /// always, sender and receiver only for transfers.
    pub fn affected_accounts(&self) -> Vec<PublicKey> {
        let mut accounts = vec![self.miner];
        if self.tx.is_transfer() {
            for pk in [*self.tx.sender(), *self.tx.receiver()] {
                if !accounts.contains(&pk) {
                    accounts.push(pk);
                }
            }
        }
        accounts
    }

    /// Post-state of `pk` as recorded by this block. When one key fills
    /// several roles, the sender snapshot wins over receiver, and receiver
    /// over miner, because transfer effects are applied last.
    pub fn account_state(&self, pk: &PublicKey) -> Option<Account> {
        let (balance, nonce) = if self.tx.is_transfer() && pk == self.tx.sender() {
            (self.sender_balance, self.sender_nonce)
        } else if self.tx.is_transfer() && pk == self.tx.receiver() {
            (self.receiver_balance, self.receiver_nonce)
        } else if pk == &self.miner {
            (self.miner_balance, self.miner_nonce)
        } else {
            return None;
        };
        Some(Account::new(balance, nonce, self.timestamp, self.block_number))
    }
}

impl Encodable for Block {
    fn get_entry(&self) -> Entry {
        let mut e = self.get_entry_without_signature();
        e.insert("sig", Entry::Bytes(self.signature.as_bytes().to_vec()));
        e
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block hash: {} chain_id: {} number: {} previous: {} base_target: {} cumulative_difficulty: {} miner: {}",
            self.hash,
            hex::encode(&self.chain_id),
            self.block_number,
            self.previous_block_root,
            self.base_target,
            self.cumulative_difficulty,
            self.miner,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::GENESIS_BASE_TARGET;
    use crate::wallet::keypair_from_seed;

    fn sample() -> (Block, PublicKey, SecretKey) {
        let (miner, miner_sk) = keypair_from_seed([9u8; 32]);
        let (sender, sender_sk) = keypair_from_seed([1u8; 32]);
        let (receiver, _) = keypair_from_seed([2u8; 32]);
        let mut tx =
            Transaction::new_transfer(b"test-chain".to_vec(), 10, sender, receiver, 1, 1, 100, vec![]);
        tx.sign(&sender, &sender_sk);
        let mut b = Block::new(
            BlockVersion::V1,
            b"test-chain".to_vec(),
            20,
            1,
            Sha256Hash::digest(b"parent"),
            GENESIS_BASE_TARGET,
            42,
            Sha256Hash::digest(b"gen"),
            tx,
            miner,
            PostStates {
                miner_balance: 1,
                sender_balance: -101,
                sender_nonce: 1,
                receiver_balance: 100,
                ..PostStates::default()
            },
        );
        b.sign(&miner, &miner_sk);
        (b, miner, miner_sk)
    }

    #[test]
    fn signed_block_verifies_and_survives_decoding() {
        let (b, _, _) = sample();
        assert!(b.verify_signature());
        let back = Block::from_encode(&b.get_encode()).unwrap();
        assert_eq!(back, b);
        assert_eq!(back.sha256(), b.sha256());
        assert!(back.tx().verify_signature());
    }

    #[test]
    fn hash_commits_to_signature() {
        let (b, miner, miner_sk) = sample();
        let unsigned = Block::new(
            b.version(),
            b.chain_id().to_vec(),
            b.timestamp(),
            b.block_number(),
            *b.previous_block_root(),
            b.base_target(),
            b.cumulative_difficulty(),
            *b.generation_signature(),
            b.tx().clone(),
            miner,
            PostStates {
                miner_balance: 1,
                sender_balance: -101,
                sender_nonce: 1,
                receiver_balance: 100,
                ..PostStates::default()
            },
        );
        assert_ne!(unsigned.sha256(), b.sha256());
        let mut resigned = unsigned.clone();
        resigned.sign(&miner, &miner_sk);
        assert_eq!(resigned.sha256(), b.sha256());
    }

    #[test]
    fn tampered_block_fails_verification() {
        let (b, _, _) = sample();
        let mut e = b.get_entry();
        e.insert("mb", le_i64(1_000_000));
        assert!(!Block::from_entry(&e).verify_signature());
    }

    #[test]
    fn account_snapshots_by_role() {
        let (b, miner, _) = sample();
        let sender = *b.tx().sender();
        let receiver = *b.tx().receiver();
        assert_eq!(b.affected_accounts(), vec![miner, sender, receiver]);
        assert_eq!(b.account_state(&sender), Some(Account::new(-101, 1, 20, 1)));
        assert_eq!(b.account_state(&receiver).unwrap().balance(), 100);
        assert_eq!(b.account_state(&miner).unwrap().balance(), 1);
        assert_eq!(b.account_state(&PublicKey([0x55; 32])), None);
    }

    #[test]
    fn unknown_keys_do_not_change_the_hash() {
        let (b, _, _) = sample();
        let mut tx = b.tx().get_entry();
        tx.insert("zz", Entry::Bytes(b"tx-junk".to_vec()));
        let mut e = b.get_entry();
        e.insert("zz", Entry::Bytes(b"junk".to_vec()));
        e.insert("x", tx);

        let back = Block::from_entry(&e);
        assert!(back.verify_signature());
        assert_eq!(back.sha256(), b.sha256());
        assert_eq!(back.tx().sha256(), b.tx().sha256());
        assert_eq!(Sha256Hash::digest(&back.get_encode()), *back.sha256());
    }
}
