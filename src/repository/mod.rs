//! Chain-state storage.
//!
//! `Repository` has a small set of required storage primitives. Every
//! chain-state operation (connecting and rolling back blocks, account
//! lookup, state linker maintenance) is a provided method written once on
//! top of them, so the durable store and the tracking overlay cannot drift
//! apart.

pub mod durable;
pub mod keys;
pub mod track;

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use rand::seq::IteratorRandom;
use thiserror::Error;

use crate::blockchain::{
    Account, AccountBlockPointer, Block, EFFECTIVE_POWER_WINDOW, IndexKeyInfo, Sha256Hash,
    StateArray, StateLinker,
};
use crate::codec::{CodecError, Encodable, Entry};
use crate::wallet::PublicKey;

pub use durable::RepositoryImpl;
pub use track::RepositoryTrack;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key/value store error: {0}")]
    Sled(#[from] sled::Error),
    #[error("relational index error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Codec(#[from] CodecError),
    #[error("block {0} not found")]
    BlockNotFound(Sha256Hash),
    #[error("block {block} cannot be linked: {reason}")]
    Linkage { block: Sha256Hash, reason: String },
    #[error("inconsistent chain state: {0}")]
    InconsistentState(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

fn linkage(block: &Block, reason: impl Into<String>) -> RepositoryError {
    RepositoryError::Linkage {
        block: *block.sha256(),
        reason: reason.into(),
    }
}

/// Where an incoming block fits relative to the retained best chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPlacement {
    /// Child of the best tip, or the first block of an empty chain.
    ExtendsTip,
    /// Parent of the best tail (history backfill).
    ExtendsTail,
    /// Competing block that does not extend either end.
    Fork,
    /// Already on the best chain, or older than the retained tail.
    Stale,
}

fn load<R, T>(
    repo: &R,
    key: &[u8],
    decode: fn(&[u8]) -> std::result::Result<T, CodecError>,
) -> Result<Option<T>>
where
    R: Repository + ?Sized,
{
    match repo.get_value(key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn decode_hash(bytes: &[u8]) -> std::result::Result<Sha256Hash, CodecError> {
    if bytes.len() != 32 {
        return Err(CodecError::InvalidLength(bytes.len()));
    }
    Ok(Sha256Hash::from_slice(bytes))
}

fn decode_chains(bytes: &[u8]) -> std::result::Result<BTreeSet<Vec<u8>>, CodecError> {
    let e = Entry::decode(bytes)?;
    Ok(e.as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(Entry::as_bytes)
        .map(<[u8]>::to_vec)
        .collect())
}

pub trait Repository {
    /// Read a raw value, seeing any writes staged but not yet flushed.
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put_value(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    fn delete_value(&mut self, key: Vec<u8>) -> Result<()>;

    /// Record that `block` entered or left the best chain so secondary
    /// indexes can be reconciled on flush.
    fn note_main_chain_block(&mut self, block: &Block);

    /// Peer sets live outside the staged write path. On the durable
    /// store their mutations apply at once and survive `rollback`; only a
    /// tracking overlay buffers them until `commit`.
    fn create_peer_db(&mut self, chain_id: &[u8]) -> Result<()>;

    fn delete_peer_db(&mut self, chain_id: &[u8]) -> Result<()>;

    fn get_all_peers(&self, chain_id: &[u8]) -> Result<BTreeSet<PublicKey>>;

    fn add_peer_in_peer_db(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()>;

    fn delete_peer_in_peer_db(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()>;

    fn get_all_gossip_peers(&self, chain_id: &[u8]) -> Result<BTreeSet<PublicKey>>;

    fn add_gossip_peer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()>;

    fn delete_gossip_peer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()>;

    /// Absorb a tracking session's pending writes (`None` deletes the key)
    /// and the main-chain blocks it touched. Nothing is durable until
    /// `flush`.
    fn update_batch(
        &mut self,
        cache: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
        main_chain_blocks: Vec<Block>,
    ) -> Result<()>;

    /// Make every staged write durable as one atomic unit.
    fn flush(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    /// Discard every staged write. Peer-set changes are not staged.
    fn rollback(&mut self);

    /// Open a speculative overlay on top of this repository.
    fn start_tracking(&mut self) -> RepositoryTrack<'_>
    where
        Self: Sized,
    {
        RepositoryTrack::new(self)
    }

    fn get_peer_randomly(&self, chain_id: &[u8]) -> Result<Option<PublicKey>> {
        let peers = self.get_all_peers(chain_id)?;
        Ok(peers.into_iter().choose(&mut rand::thread_rng()))
    }

    fn get_chains(&self) -> Result<BTreeSet<Vec<u8>>> {
        Ok(load(self, &keys::chains(), decode_chains)?.unwrap_or_default())
    }

    fn save_chains(&mut self, chains: &BTreeSet<Vec<u8>>) -> Result<()> {
        let e = Entry::List(chains.iter().cloned().map(Entry::Bytes).collect());
        self.put_value(keys::chains(), e.encode())
    }

    fn add_chain(&mut self, chain_id: &[u8]) -> Result<()> {
        let mut chains = self.get_chains()?;
        if chains.insert(chain_id.to_vec()) {
            self.save_chains(&chains)?;
        }
        Ok(())
    }

    fn is_block_exist(&self, hash: &Sha256Hash) -> Result<bool> {
        Ok(self.get_value(&keys::block(hash))?.is_some())
    }

    fn get_block_by_hash(&self, hash: &Sha256Hash) -> Result<Option<Block>> {
        load(self, &keys::block(hash), Block::from_encode)
    }

    /// Store a fork candidate and record it in the height index.
    fn save_block(&mut self, block: &Block) -> Result<()> {
        let hash = *block.sha256();
        self.put_value(keys::block(&hash), block.get_encode())?;
        let mut info = self
            .get_index_info(block.chain_id(), block.block_number())?
            .unwrap_or_default();
        info.add_non_main_chain_block_hash(hash);
        self.save_index_info(block.chain_id(), block.block_number(), &info)?;
        debug!("saved non-main block {} at {}", hash, block.block_number());
        Ok(())
    }

    /// Remove a block that is not on the best chain.
    fn delete_block(&mut self, hash: &Sha256Hash) -> Result<()> {
        let Some(block) = self.get_block_by_hash(hash)? else {
            return Ok(());
        };
        if let Some(mut info) = self.get_index_info(block.chain_id(), block.block_number())? {
            if info.main_chain_block_hash() == Some(hash) {
                return Err(linkage(&block, "block is on the best chain"));
            }
            info.remove_block_hash(hash);
            if info.is_empty() {
                self.delete_index_info(block.chain_id(), block.block_number())?;
            } else {
                self.save_index_info(block.chain_id(), block.block_number(), &info)?;
            }
        }
        self.delete_value(keys::block(hash))?;
        self.delete_state_linker(hash)?;
        debug!("deleted block {}", hash);
        if let Some(child_height) = block.block_number().checked_add(1) {
            self.prune_orphans(block.chain_id(), child_height, BTreeSet::from([*hash]))?;
        }
        Ok(())
    }

    /// Delete non-main blocks from `height` upwards whose parent is in
    /// `removed`, following their descendants. Returns how many went.
    fn prune_orphans(
        &mut self,
        chain_id: &[u8],
        height: i64,
        mut removed: BTreeSet<Sha256Hash>,
    ) -> Result<usize> {
        let mut pruned = 0;
        let mut height = Some(height);
        while let Some(h) = height.filter(|_| !removed.is_empty()) {
            let Some(mut info) = self.get_index_info(chain_id, h)? else {
                break;
            };
            let mut orphans = BTreeSet::new();
            for hash in info.non_main_chain_block_hashes() {
                if let Some(child) = self.get_block_by_hash(hash)? {
                    if removed.contains(child.previous_block_root()) {
                        orphans.insert(*hash);
                    }
                }
            }
            if !orphans.is_empty() {
                for hash in &orphans {
                    info.remove_block_hash(hash);
                    self.delete_value(keys::block(hash))?;
                    self.delete_state_linker(hash)?;
                }
                if info.is_empty() {
                    self.delete_index_info(chain_id, h)?;
                } else {
                    self.save_index_info(chain_id, h, &info)?;
                }
            }
            pruned += orphans.len();
            removed = orphans;
            height = h.checked_add(1);
        }
        if pruned > 0 {
            debug!("pruned {} orphaned blocks", pruned);
        }
        Ok(pruned)
    }

    fn get_best_tip_block_hash(&self, chain_id: &[u8]) -> Result<Option<Sha256Hash>> {
        load(self, &keys::best_tip(chain_id), decode_hash)
    }

    fn get_best_tip_block(&self, chain_id: &[u8]) -> Result<Option<Block>> {
        match self.get_best_tip_block_hash(chain_id)? {
            Some(hash) => self
                .get_block_by_hash(&hash)?
                .map(Some)
                .ok_or(RepositoryError::BlockNotFound(hash)),
            None => Ok(None),
        }
    }

    fn set_best_tip_block_hash(&mut self, chain_id: &[u8], hash: &Sha256Hash) -> Result<()> {
        self.put_value(keys::best_tip(chain_id), hash.as_bytes().to_vec())
    }

    fn delete_best_tip_block_hash(&mut self, chain_id: &[u8]) -> Result<()> {
        self.delete_value(keys::best_tip(chain_id))
    }

    fn get_best_tail_block_hash(&self, chain_id: &[u8]) -> Result<Option<Sha256Hash>> {
        load(self, &keys::best_tail(chain_id), decode_hash)
    }

    fn get_best_tail_block(&self, chain_id: &[u8]) -> Result<Option<Block>> {
        match self.get_best_tail_block_hash(chain_id)? {
            Some(hash) => self
                .get_block_by_hash(&hash)?
                .map(Some)
                .ok_or(RepositoryError::BlockNotFound(hash)),
            None => Ok(None),
        }
    }

    fn set_best_tail_block_hash(&mut self, chain_id: &[u8], hash: &Sha256Hash) -> Result<()> {
        self.put_value(keys::best_tail(chain_id), hash.as_bytes().to_vec())
    }

    fn delete_best_tail_block_hash(&mut self, chain_id: &[u8]) -> Result<()> {
        self.delete_value(keys::best_tail(chain_id))
    }

    fn get_account_block_pointer(
        &self,
        chain_id: &[u8],
        pk: &PublicKey,
    ) -> Result<Option<AccountBlockPointer>> {
        load(
            self,
            &keys::account_block_pointer(chain_id, pk),
            AccountBlockPointer::from_encode,
        )
    }

    fn save_account_block_pointer(
        &mut self,
        chain_id: &[u8],
        pk: &PublicKey,
        pointer: &AccountBlockPointer,
    ) -> Result<()> {
        self.put_value(keys::account_block_pointer(chain_id, pk), pointer.get_encode())
    }

    fn delete_account_block_pointer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.delete_value(keys::account_block_pointer(chain_id, pk))
    }

    fn get_state_linker(&self, hash: &Sha256Hash) -> Result<Option<StateLinker>> {
        load(self, &keys::state_linker(hash), StateLinker::from_encode)
    }

    fn save_state_linker(&mut self, linker: &StateLinker) -> Result<()> {
        self.put_value(keys::state_linker(linker.block_hash()), linker.get_encode())
    }

    fn delete_state_linker(&mut self, hash: &Sha256Hash) -> Result<()> {
        self.delete_value(keys::state_linker(hash))
    }

    fn get_index_info(&self, chain_id: &[u8], block_number: i64) -> Result<Option<IndexKeyInfo>> {
        load(
            self,
            &keys::index_info(chain_id, block_number),
            IndexKeyInfo::from_encode,
        )
    }

    fn save_index_info(
        &mut self,
        chain_id: &[u8],
        block_number: i64,
        info: &IndexKeyInfo,
    ) -> Result<()> {
        self.put_value(keys::index_info(chain_id, block_number), info.get_encode())
    }

    fn delete_index_info(&mut self, chain_id: &[u8], block_number: i64) -> Result<()> {
        self.delete_value(keys::index_info(chain_id, block_number))
    }

    fn get_main_chain_block_hash_by_number(
        &self,
        chain_id: &[u8],
        block_number: i64,
    ) -> Result<Option<Sha256Hash>> {
        Ok(self
            .get_index_info(chain_id, block_number)?
            .and_then(|info| info.main_chain_block_hash().copied()))
    }

    fn get_main_chain_block_by_number(
        &self,
        chain_id: &[u8],
        block_number: i64,
    ) -> Result<Option<Block>> {
        match self.get_main_chain_block_hash_by_number(chain_id, block_number)? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    fn is_account_exist(&self, chain_id: &[u8], pk: &PublicKey) -> Result<bool> {
        Ok(self.get_account_block_pointer(chain_id, pk)?.is_some())
    }

    /// Current state of `pk`, checking that the block holding it is still
    /// the best-chain block at its height. Unknown accounts are empty.
    fn get_account(&self, chain_id: &[u8], pk: &PublicKey) -> Result<Account> {
        let Some(pointer) = self.get_account_block_pointer(chain_id, pk)? else {
            return Ok(Account::default());
        };
        let hash = pointer.latest_block_hash();
        let block = self
            .get_block_by_hash(hash)?
            .ok_or(RepositoryError::BlockNotFound(*hash))?;
        let main = self.get_main_chain_block_hash_by_number(chain_id, block.block_number())?;
        if main.as_ref() != Some(hash) {
            return Err(RepositoryError::InconsistentState(format!(
                "account {} points at {} which is off the best chain",
                pk, hash
            )));
        }
        block.account_state(pk).ok_or_else(|| {
            RepositoryError::InconsistentState(format!("block {} does not name {}", hash, pk))
        })
    }

    fn get_account_without_verification(&self, chain_id: &[u8], pk: &PublicKey) -> Result<Account> {
        let Some(pointer) = self.get_account_block_pointer(chain_id, pk)? else {
            return Ok(Account::default());
        };
        let hash = pointer.latest_block_hash();
        let block = self
            .get_block_by_hash(hash)?
            .ok_or(RepositoryError::BlockNotFound(*hash))?;
        Ok(block.account_state(pk).unwrap_or_default())
    }

    /// Best-chain state of `pks`, in the order given.
    fn get_state_array(&self, chain_id: &[u8], pks: &[PublicKey]) -> Result<StateArray> {
        let accounts = pks
            .iter()
            .map(|pk| self.get_account(chain_id, pk))
            .collect::<Result<Vec<_>>>()?;
        Ok(StateArray::new(accounts))
    }

    /// Number of best-chain blocks naming `pk` within the last
    /// `EFFECTIVE_POWER_WINDOW` heights, found by walking its state linker
    /// history back from the latest one.
    fn get_effective_power(&self, chain_id: &[u8], pk: &PublicKey) -> Result<i64> {
        let Some(pointer) = self.get_account_block_pointer(chain_id, pk)? else {
            return Ok(0);
        };
        let tip_number = match self.get_best_tip_block(chain_id)? {
            Some(tip) => tip.block_number(),
            None => return Ok(0),
        };
        let floor = tip_number.saturating_sub(EFFECTIVE_POWER_WINDOW);

        let mut power = 0;
        let mut cursor = *pointer.latest_block_hash();
        while !cursor.is_all_zeros() {
            let Some(block) = self.get_block_by_hash(&cursor)? else {
                break;
            };
            if block.block_number() <= floor {
                break;
            }
            power += 1;
            cursor = match self.get_state_linker(&cursor)? {
                Some(linker) => linker
                    .previous_change(pk)
                    .copied()
                    .unwrap_or(Sha256Hash::GENESIS_SENTINEL),
                None => break,
            };
        }
        Ok(power)
    }

    fn get_account_with_effective_power(&self, chain_id: &[u8], pk: &PublicKey) -> Result<Account> {
        let mut account = self.get_account(chain_id, pk)?;
        account.set_effective_power(self.get_effective_power(chain_id, pk)?);
        Ok(account)
    }

    fn classify_block(&self, block: &Block) -> Result<BlockPlacement> {
        let chain_id = block.chain_id();
        let hash = block.sha256();
        if self.get_main_chain_block_hash_by_number(chain_id, block.block_number())?.as_ref()
            == Some(hash)
        {
            return Ok(BlockPlacement::Stale);
        }
        let Some(tip) = self.get_best_tip_block(chain_id)? else {
            return Ok(BlockPlacement::ExtendsTip);
        };
        if block.previous_block_root() == tip.sha256() {
            return Ok(BlockPlacement::ExtendsTip);
        }
        if let Some(tail) = self.get_best_tail_block(chain_id)? {
            if tail.previous_block_root() == hash {
                return Ok(BlockPlacement::ExtendsTail);
            }
            if block.block_number() < tail.block_number() {
                return Ok(BlockPlacement::Stale);
            }
        }
        Ok(BlockPlacement::Fork)
    }

    /// Append `block` to the best chain: store it, thread every affected
    /// account's history through it, and move the tip.
    fn connect_tip_block(&mut self, block: &Block) -> Result<()> {
        let chain_id = block.chain_id();
        let hash = *block.sha256();
        if let Some(tip) = self.get_best_tip_block(chain_id)? {
            if block.previous_block_root() != tip.sha256() {
                return Err(linkage(block, format!("parent is not the best tip {}", tip.sha256())));
            }
            if tip.block_number().checked_add(1) != Some(block.block_number()) {
                return Err(linkage(
                    block,
                    format!("height {} does not follow tip height {}", block.block_number(), tip.block_number()),
                ));
            }
        }

        self.put_value(keys::block(&hash), block.get_encode())?;

        let mut linker = StateLinker::new(hash);
        for pk in block.affected_accounts() {
            match self.get_account_block_pointer(chain_id, &pk)? {
                Some(mut pointer) => {
                    let previous = *pointer.latest_block_hash();
                    if let Some(mut older) = self.get_state_linker(&previous)? {
                        older.update_next_change(pk, hash);
                        self.save_state_linker(&older)?;
                    }
                    linker.update_previous_change(pk, previous);
                    pointer.set_latest_block_hash(hash);
                    self.save_account_block_pointer(chain_id, &pk, &pointer)?;
                }
                None => {
                    linker.update_previous_change(pk, Sha256Hash::GENESIS_SENTINEL);
                    self.save_account_block_pointer(
                        chain_id,
                        &pk,
                        &AccountBlockPointer::new(hash, hash),
                    )?;
                }
            }
        }
        self.save_state_linker(&linker)?;

        let mut info = self
            .get_index_info(chain_id, block.block_number())?
            .unwrap_or_default();
        info.set_main_chain_block_hash(hash);
        self.save_index_info(chain_id, block.block_number(), &info)?;

        self.set_best_tip_block_hash(chain_id, &hash)?;
        if self.get_best_tail_block_hash(chain_id)?.is_none() {
            self.set_best_tail_block_hash(chain_id, &hash)?;
        }
        self.add_chain(chain_id)?;
        self.note_main_chain_block(block);
        info!("connected tip block {} at {}", hash, block.block_number());
        Ok(())
    }

    /// Prepend `block` below the best tail, extending retained history
    /// backwards.
    fn connect_tail_block(&mut self, block: &Block) -> Result<()> {
        let chain_id = block.chain_id();
        let hash = *block.sha256();
        let tail = self
            .get_best_tail_block(chain_id)?
            .ok_or_else(|| linkage(block, "chain has no tail"))?;
        if tail.previous_block_root() != &hash || block.block_number().checked_add(1) != Some(tail.block_number()) {
            return Err(linkage(block, format!("not the parent of tail {}", tail.sha256())));
        }

        self.put_value(keys::block(&hash), block.get_encode())?;

        let mut linker = StateLinker::new(hash);
        for pk in block.affected_accounts() {
            linker.update_previous_change(pk, Sha256Hash::GENESIS_SENTINEL);
            match self.get_account_block_pointer(chain_id, &pk)? {
                Some(mut pointer) => {
                    let next = *pointer.oldest_block_hash();
                    if let Some(mut newer) = self.get_state_linker(&next)? {
                        newer.update_previous_change(pk, hash);
                        self.save_state_linker(&newer)?;
                    }
                    linker.update_next_change(pk, next);
                    pointer.set_oldest_block_hash(hash);
                    self.save_account_block_pointer(chain_id, &pk, &pointer)?;
                }
                None => {
                    self.save_account_block_pointer(
                        chain_id,
                        &pk,
                        &AccountBlockPointer::new(hash, hash),
                    )?;
                }
            }
        }
        self.save_state_linker(&linker)?;

        let mut info = self
            .get_index_info(chain_id, block.block_number())?
            .unwrap_or_default();
        info.set_main_chain_block_hash(hash);
        self.save_index_info(chain_id, block.block_number(), &info)?;

        self.set_best_tail_block_hash(chain_id, &hash)?;
        self.note_main_chain_block(block);
        info!("connected tail block {} at {}", hash, block.block_number());
        Ok(())
    }

    /// Detach the best tip. The block stays stored as a fork candidate.
    fn rollback_block(&mut self, block: &Block) -> Result<()> {
        let chain_id = block.chain_id();
        let hash = *block.sha256();
        if self.get_best_tip_block_hash(chain_id)? != Some(hash) {
            return Err(linkage(block, "not the best tip"));
        }
        let linker = self
            .get_state_linker(&hash)?
            .unwrap_or_else(|| StateLinker::new(hash));

        for pk in block.affected_accounts() {
            let previous = linker
                .previous_change(&pk)
                .copied()
                .unwrap_or(Sha256Hash::GENESIS_SENTINEL);
            if !previous.is_all_zeros() {
                if let Some(mut older) = self.get_state_linker(&previous)? {
                    older.clear_next_change(&pk);
                    self.save_state_linker(&older)?;
                }
            }
            match self.get_account_block_pointer(chain_id, &pk)? {
                Some(mut pointer)
                    if !previous.is_all_zeros() && pointer.oldest_block_hash() != &hash =>
                {
                    pointer.set_latest_block_hash(previous);
                    self.save_account_block_pointer(chain_id, &pk, &pointer)?;
                }
                _ => self.delete_account_block_pointer(chain_id, &pk)?,
            }
        }
        self.delete_state_linker(&hash)?;

        let mut info = self
            .get_index_info(chain_id, block.block_number())?
            .unwrap_or_default();
        info.detach_main_chain_block_hash(&hash);
        self.save_index_info(chain_id, block.block_number(), &info)?;

        if self.get_best_tail_block_hash(chain_id)? == Some(hash) {
            self.delete_best_tip_block_hash(chain_id)?;
            self.delete_best_tail_block_hash(chain_id)?;
        } else {
            self.set_best_tip_block_hash(chain_id, block.previous_block_root())?;
        }
        self.note_main_chain_block(block);
        info!("rolled back tip block {} at {}", hash, block.block_number());
        Ok(())
    }

    /// Prune the best tail, along with any fork blocks at its height and
    /// their descendants.
    fn expire_block(&mut self, block: &Block) -> Result<()> {
        let chain_id = block.chain_id();
        let hash = *block.sha256();
        if self.get_best_tail_block_hash(chain_id)? != Some(hash) {
            return Err(linkage(block, "not the best tail"));
        }
        let linker = self
            .get_state_linker(&hash)?
            .unwrap_or_else(|| StateLinker::new(hash));

        for pk in block.affected_accounts() {
            match linker.next_change(&pk) {
                Some(next) => {
                    if let Some(mut newer) = self.get_state_linker(next)? {
                        newer.update_previous_change(pk, Sha256Hash::GENESIS_SENTINEL);
                        self.save_state_linker(&newer)?;
                    }
                    if let Some(mut pointer) = self.get_account_block_pointer(chain_id, &pk)? {
                        pointer.set_oldest_block_hash(*next);
                        self.save_account_block_pointer(chain_id, &pk, &pointer)?;
                    }
                }
                None => self.delete_account_block_pointer(chain_id, &pk)?,
            }
        }

        let number = block.block_number();
        let next_number = number.checked_add(1);
        let next_tail = match next_number {
            Some(n) => self.get_main_chain_block_hash_by_number(chain_id, n)?,
            None => None,
        };
        match next_tail {
            Some(next_tail) => self.set_best_tail_block_hash(chain_id, &next_tail)?,
            None => {
                self.delete_best_tail_block_hash(chain_id)?;
                self.delete_best_tip_block_hash(chain_id)?;
            }
        }

        let mut forks = BTreeSet::new();
        if let Some(info) = self.get_index_info(chain_id, number)? {
            for fork in info.non_main_chain_block_hashes() {
                self.delete_value(keys::block(fork))?;
                self.delete_state_linker(fork)?;
                forks.insert(*fork);
            }
        }
        self.delete_index_info(chain_id, number)?;
        if let Some(n) = next_number {
            self.prune_orphans(chain_id, n, forks)?;
        }
        self.delete_value(keys::block(&hash))?;
        self.delete_state_linker(&hash)?;
        self.note_main_chain_block(block);
        info!("expired tail block {} at {}", hash, number);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blockchain::block::PostStates;
    use crate::blockchain::{BlockVersion, GENESIS_BASE_TARGET};
    use crate::transaction::Transaction;
    use crate::wallet::{SecretKey, keypair_from_seed};

    pub(crate) const CHAIN: &[u8] = b"test-chain";

    pub(crate) fn key(seed: u8) -> (PublicKey, SecretKey) {
        keypair_from_seed([seed; 32])
    }

    /// A signed block with explicit post-states, bypassing consensus so
    /// storage behaviour can be tested on its own.
    pub(crate) fn raw_block(
        parent: Option<&Block>,
        miner: u8,
        tx: Transaction,
        states: PostStates,
    ) -> Block {
        let (miner_pk, miner_sk) = key(miner);
        let (previous, number, difficulty) = match parent {
            Some(p) => (*p.sha256(), p.block_number() + 1, p.cumulative_difficulty() + 1),
            None => (Sha256Hash::GENESIS_SENTINEL, 0, 0),
        };
        let mut block = Block::new(
            BlockVersion::V1,
            CHAIN.to_vec(),
            100 + number * 300,
            number,
            previous,
            GENESIS_BASE_TARGET,
            difficulty,
            Sha256Hash::digest(previous.as_bytes()),
            tx,
            miner_pk,
            states,
        );
        block.sign(&miner_pk, &miner_sk);
        block
    }

    pub(crate) fn note_block(parent: Option<&Block>, miner: u8, balance: i64) -> Block {
        let (miner_pk, miner_sk) = key(miner);
        let mut tx = Transaction::new_note(CHAIN.to_vec(), 0, miner_pk, vec![]);
        tx.sign(&miner_pk, &miner_sk);
        raw_block(
            parent,
            miner,
            tx,
            PostStates {
                miner_balance: balance,
                ..PostStates::default()
            },
        )
    }

    fn transfer_block(parent: Option<&Block>, miner: u8, from: u8, to: u8) -> Block {
        let (sender, sender_sk) = key(from);
        let (receiver, _) = key(to);
        let mut tx =
            Transaction::new_transfer(CHAIN.to_vec(), 1, sender, receiver, 0, 1, 100, vec![]);
        tx.sign(&sender, &sender_sk);
        raw_block(
            parent,
            miner,
            tx,
            PostStates {
                miner_balance: 1,
                sender_balance: -101,
                sender_nonce: 1,
                receiver_balance: 100,
                ..PostStates::default()
            },
        )
    }

    #[test]
    fn connecting_a_transfer_records_post_states() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (a, _) = key(1);
        let (b, _) = key(2);
        let block1 = transfer_block(None, 3, 1, 2);
        repo.connect_tip_block(&block1).unwrap();

        let account = repo.get_account(CHAIN, &a).unwrap();
        assert_eq!((account.balance(), account.nonce()), (-101, 1));
        assert_eq!(repo.get_account(CHAIN, &b).unwrap().balance(), 100);
        assert_eq!(repo.get_best_tip_block_hash(CHAIN).unwrap(), Some(*block1.sha256()));

        let linker = repo.get_state_linker(block1.sha256()).unwrap().unwrap();
        assert_eq!(linker.previous_change(&a), Some(&Sha256Hash::GENESIS_SENTINEL));
        assert_eq!(linker.previous_change(&b), Some(&Sha256Hash::GENESIS_SENTINEL));
        assert!(repo.get_chains().unwrap().contains(CHAIN));
    }

    #[test]
    fn history_is_traversable_and_rollback_reopens_it() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (m, _) = key(7);
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 8, 10);
        let b2 = note_block(Some(&b1), 7, 20);
        let b3 = note_block(Some(&b2), 7, 30);
        for b in [&b0, &b1, &b2, &b3] {
            repo.connect_tip_block(b).unwrap();
        }

        let mut seen = vec![];
        let mut cursor = *repo.get_account_block_pointer(CHAIN, &m).unwrap().unwrap().latest_block_hash();
        while !cursor.is_all_zeros() {
            seen.push(cursor);
            let linker = repo.get_state_linker(&cursor).unwrap().unwrap();
            cursor = *linker.previous_change(&m).unwrap();
        }
        assert_eq!(seen, vec![*b3.sha256(), *b2.sha256(), *b0.sha256()]);
        assert_eq!(repo.get_effective_power(CHAIN, &m).unwrap(), 3);

        repo.rollback_block(&b3).unwrap();
        let l2 = repo.get_state_linker(b2.sha256()).unwrap().unwrap();
        assert_eq!(l2.next_change(&m), None);
        assert_eq!(repo.get_account(CHAIN, &m).unwrap().balance(), 20);
        assert_eq!(repo.get_best_tip_block_hash(CHAIN).unwrap(), Some(*b2.sha256()));
        assert!(repo.is_block_exist(b3.sha256()).unwrap());
        assert_eq!(repo.classify_block(&b3).unwrap(), BlockPlacement::ExtendsTip);
    }

    #[test]
    fn linkage_violations_write_nothing() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        repo.connect_tip_block(&b0).unwrap();
        let orphan = note_block(Some(&b1), 7, 30);
        assert!(matches!(
            repo.connect_tip_block(&orphan),
            Err(RepositoryError::Linkage { .. })
        ));
        assert!(!repo.is_block_exist(orphan.sha256()).unwrap());
        assert!(repo.rollback_block(&b1).is_err());
    }

    #[test]
    fn tail_connection_and_expiry() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (m, _) = key(7);
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        let b2 = note_block(Some(&b1), 8, 5);
        repo.connect_tip_block(&b1).unwrap();
        repo.connect_tip_block(&b2).unwrap();
        assert_eq!(repo.classify_block(&b0).unwrap(), BlockPlacement::ExtendsTail);

        repo.connect_tail_block(&b0).unwrap();
        assert_eq!(repo.get_best_tail_block_hash(CHAIN).unwrap(), Some(*b0.sha256()));
        let l1 = repo.get_state_linker(b1.sha256()).unwrap().unwrap();
        assert_eq!(l1.previous_change(&m), Some(b0.sha256()));
        let pointer = repo.get_account_block_pointer(CHAIN, &m).unwrap().unwrap();
        assert_eq!(pointer.oldest_block_hash(), b0.sha256());

        repo.expire_block(&b0).unwrap();
        repo.expire_block(&b1).unwrap();
        assert!(!repo.is_account_exist(CHAIN, &m).unwrap());
        assert_eq!(repo.get_best_tail_block_hash(CHAIN).unwrap(), Some(*b2.sha256()));
        assert!(repo.get_block_by_hash(b0.sha256()).unwrap().is_none());
        assert!(repo.get_index_info(CHAIN, 1).unwrap().is_none());
    }

    #[test]
    fn forks_are_indexed_and_deletable() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        let rival = note_block(Some(&b0), 8, 20);
        repo.connect_tip_block(&b0).unwrap();
        repo.connect_tip_block(&b1).unwrap();

        assert_eq!(repo.classify_block(&rival).unwrap(), BlockPlacement::Fork);
        repo.save_block(&rival).unwrap();
        let info = repo.get_index_info(CHAIN, 1).unwrap().unwrap();
        assert!(info.non_main_chain_block_hashes().contains(rival.sha256()));

        assert!(repo.delete_block(b1.sha256()).is_err());
        repo.delete_block(rival.sha256()).unwrap();
        assert!(!repo.is_block_exist(rival.sha256()).unwrap());
        assert_eq!(repo.classify_block(&b1).unwrap(), BlockPlacement::Stale);
    }

    #[test]
    fn orphaned_fork_descendants_are_pruned() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        let b2 = note_block(Some(&b1), 7, 30);
        for b in [&b0, &b1, &b2] {
            repo.connect_tip_block(b).unwrap();
        }
        let f1 = note_block(Some(&b0), 8, 1);
        let f2 = note_block(Some(&f1), 8, 2);
        let f3 = note_block(Some(&f2), 8, 3);
        for b in [&f1, &f2, &f3] {
            repo.save_block(b).unwrap();
        }

        repo.expire_block(&b0).unwrap();
        repo.expire_block(&b1).unwrap();
        for gone in [&f1, &f2, &f3] {
            assert!(!repo.is_block_exist(gone.sha256()).unwrap());
        }
        assert!(repo.get_index_info(CHAIN, 3).unwrap().is_none());
        let info = repo.get_index_info(CHAIN, 2).unwrap().unwrap();
        assert_eq!(info.main_chain_block_hash(), Some(b2.sha256()));
        assert!(info.non_main_chain_block_hashes().is_empty());
    }

    #[test]
    fn deleting_a_fork_takes_its_descendants() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        repo.connect_tip_block(&b0).unwrap();
        repo.connect_tip_block(&b1).unwrap();
        let f1 = note_block(Some(&b0), 8, 1);
        let f2 = note_block(Some(&f1), 8, 2);
        repo.save_block(&f1).unwrap();
        repo.save_block(&f2).unwrap();

        repo.delete_block(f1.sha256()).unwrap();
        assert!(!repo.is_block_exist(f2.sha256()).unwrap());
        assert!(repo.get_index_info(CHAIN, 2).unwrap().is_none());
        assert!(repo.is_block_exist(b1.sha256()).unwrap());
    }

    #[test]
    fn state_array_snapshots_best_chain_accounts() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (m, _) = key(7);
        let (stranger, _) = key(42);
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        repo.connect_tip_block(&b0).unwrap();
        let before = repo.get_state_array(CHAIN, &[m, stranger]).unwrap();
        repo.connect_tip_block(&b1).unwrap();
        let after = repo.get_state_array(CHAIN, &[m, stranger]).unwrap();

        assert_eq!(after.accounts()[0].balance(), 20);
        assert_eq!(after.accounts()[1], Account::default());
        assert_ne!(before.sha256(), after.sha256());
    }
}
