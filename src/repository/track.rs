use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::{Repository, Result};
use crate::blockchain::Block;
use crate::wallet::PublicKey;

enum PeerOp {
    CreateDb(Vec<u8>),
    DeleteDb(Vec<u8>),
    AddPeer(Vec<u8>, PublicKey),
    DeletePeer(Vec<u8>, PublicKey),
    AddGossipPeer(Vec<u8>, PublicKey),
    DeleteGossipPeer(Vec<u8>, PublicKey),
}

/// Copy-on-write overlay over another repository.
///
/// Every write lands in `cache` (`None` marks a deletion); reads consult the
/// cache before the backing repository. Nothing reaches the backing
/// repository until `commit`; dropping the overlay discards it.
pub struct RepositoryTrack<'a> {
    repository: &'a mut dyn Repository,
    cache: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    main_chain_blocks: Vec<Block>,
    peer_ops: Vec<PeerOp>,
}

impl<'a> RepositoryTrack<'a> {
    pub fn new(repository: &'a mut dyn Repository) -> Self {
        Self {
            repository,
            cache: BTreeMap::new(),
            main_chain_blocks: Vec::new(),
            peer_ops: Vec::new(),
        }
    }

    /// Number of keys written in this session.
    pub fn pending_writes(&self) -> usize {
        self.cache.len()
    }

    fn replay_peers(&self, chain_id: &[u8], gossip: bool) -> Result<BTreeSet<PublicKey>> {
        let mut peers = if gossip {
            self.repository.get_all_gossip_peers(chain_id)?
        } else {
            self.repository.get_all_peers(chain_id)?
        };
        for op in &self.peer_ops {
            match op {
                PeerOp::DeleteDb(c) if c == chain_id => peers.clear(),
                PeerOp::AddPeer(c, pk) if !gossip && c == chain_id => {
                    peers.insert(*pk);
                }
                PeerOp::DeletePeer(c, pk) if !gossip && c == chain_id => {
                    peers.remove(pk);
                }
                PeerOp::AddGossipPeer(c, pk) if gossip && c == chain_id => {
                    peers.insert(*pk);
                }
                PeerOp::DeleteGossipPeer(c, pk) if gossip && c == chain_id => {
                    peers.remove(pk);
                }
                _ => {}
            }
        }
        Ok(peers)
    }
}

impl Repository for RepositoryTrack<'_> {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.cache.get(key) {
            Some(cached) => Ok(cached.clone()),
            None => self.repository.get_value(key),
        }
    }

    fn put_value(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.cache.insert(key, Some(value));
        Ok(())
    }

    fn delete_value(&mut self, key: Vec<u8>) -> Result<()> {
        self.cache.insert(key, None);
        Ok(())
    }

    fn note_main_chain_block(&mut self, block: &Block) {
        self.main_chain_blocks.push(block.clone());
    }

    fn create_peer_db(&mut self, chain_id: &[u8]) -> Result<()> {
        self.peer_ops.push(PeerOp::CreateDb(chain_id.to_vec()));
        Ok(())
    }

    fn delete_peer_db(&mut self, chain_id: &[u8]) -> Result<()> {
        self.peer_ops.push(PeerOp::DeleteDb(chain_id.to_vec()));
        Ok(())
    }

    fn get_all_peers(&self, chain_id: &[u8]) -> Result<BTreeSet<PublicKey>> {
        self.replay_peers(chain_id, false)
    }

    fn add_peer_in_peer_db(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.peer_ops.push(PeerOp::AddPeer(chain_id.to_vec(), *pk));
        Ok(())
    }

    fn delete_peer_in_peer_db(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.peer_ops.push(PeerOp::DeletePeer(chain_id.to_vec(), *pk));
        Ok(())
    }

    fn get_all_gossip_peers(&self, chain_id: &[u8]) -> Result<BTreeSet<PublicKey>> {
        self.replay_peers(chain_id, true)
    }

    fn add_gossip_peer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.peer_ops.push(PeerOp::AddGossipPeer(chain_id.to_vec(), *pk));
        Ok(())
    }

    fn delete_gossip_peer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.peer_ops.push(PeerOp::DeleteGossipPeer(chain_id.to_vec(), *pk));
        Ok(())
    }

    fn update_batch(
        &mut self,
        cache: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
        main_chain_blocks: Vec<Block>,
    ) -> Result<()> {
        self.cache.extend(cache);
        self.main_chain_blocks.extend(main_chain_blocks);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.commit()?;
        self.repository.flush()
    }

    /// Hand every pending write to the backing repository.
    fn commit(&mut self) -> Result<()> {
        let cache = std::mem::take(&mut self.cache);
        let blocks = std::mem::take(&mut self.main_chain_blocks);
        debug!("committing {} tracked writes", cache.len());
        self.repository.update_batch(cache, blocks)?;
        for op in std::mem::take(&mut self.peer_ops) {
            match op {
                PeerOp::CreateDb(c) => self.repository.create_peer_db(&c)?,
                PeerOp::DeleteDb(c) => self.repository.delete_peer_db(&c)?,
                PeerOp::AddPeer(c, pk) => self.repository.add_peer_in_peer_db(&c, &pk)?,
                PeerOp::DeletePeer(c, pk) => self.repository.delete_peer_in_peer_db(&c, &pk)?,
                PeerOp::AddGossipPeer(c, pk) => self.repository.add_gossip_peer(&c, &pk)?,
                PeerOp::DeleteGossipPeer(c, pk) => self.repository.delete_gossip_peer(&c, &pk)?,
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        debug!("dropping {} tracked writes", self.cache.len());
        self.cache.clear();
        self.main_chain_blocks.clear();
        self.peer_ops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryImpl;
    use crate::repository::keys;
    use crate::repository::tests::{CHAIN, key, note_block};

    #[test]
    fn writes_stay_invisible_until_commit() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        repo.connect_tip_block(&b0).unwrap();
        repo.flush().unwrap();
        let before = repo.get_value(&keys::best_tip(CHAIN)).unwrap();

        let mut track = repo.start_tracking();
        track.connect_tip_block(&b1).unwrap();
        assert_eq!(track.get_best_tip_block_hash(CHAIN).unwrap(), Some(*b1.sha256()));
        track.rollback();
        assert_eq!(track.pending_writes(), 0);

        assert_eq!(repo.get_value(&keys::best_tip(CHAIN)).unwrap(), before);
        assert!(!repo.is_block_exist(b1.sha256()).unwrap());

        let mut track = repo.start_tracking();
        track.connect_tip_block(&b1).unwrap();
        track.commit().unwrap();
        assert_eq!(repo.get_best_tip_block_hash(CHAIN).unwrap(), Some(*b1.sha256()));
        repo.flush().unwrap();
        assert_eq!(repo.main_chain_block_range(CHAIN, 0, 10).unwrap().len(), 2);
    }

    #[test]
    fn dropped_session_leaves_backing_untouched() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        {
            let mut track = repo.start_tracking();
            track.connect_tip_block(&b0).unwrap();
        }
        assert!(repo.get_best_tip_block_hash(CHAIN).unwrap().is_none());
    }

    #[test]
    fn nested_sessions_commit_into_their_parent() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 8, 10);
        let mut outer = repo.start_tracking();
        outer.connect_tip_block(&b0).unwrap();
        {
            let mut inner = outer.start_tracking();
            inner.connect_tip_block(&b1).unwrap();
            inner.commit().unwrap();
        }
        assert_eq!(outer.get_best_tip_block_hash(CHAIN).unwrap(), Some(*b1.sha256()));
        outer.rollback();
        assert!(outer.get_best_tip_block_hash(CHAIN).unwrap().is_none());
    }

    #[test]
    fn peer_changes_are_buffered() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (a, _) = key(1);
        let mut track = repo.start_tracking();
        track.add_peer_in_peer_db(CHAIN, &a).unwrap();
        assert!(track.get_all_peers(CHAIN).unwrap().contains(&a));
        track.commit().unwrap();
        assert!(repo.get_all_peers(CHAIN).unwrap().contains(&a));
    }
}
