use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};

use super::{Repository, Result};
use crate::blockchain::{Block, Sha256Hash};
use crate::wallet::PublicKey;

/// Durable repository: blobs and pointers in sled, the best-chain height
/// index and per-chain peer sets in SQLite.
///
/// Writes are staged in `write_batch` (reads see them) and only reach sled
/// on `flush`, as one atomic batch.
///
/// Peer sets are not staged: their mutations hit SQLite at once and
/// `rollback` leaves them alone.
pub struct RepositoryImpl {
    db: sled::Db,
    conn: Connection,
    write_batch: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    main_chain_blocks: Vec<Block>,
}

fn peer_table(chain_id: &[u8]) -> String {
    format!("peers_{}", hex::encode(chain_id))
}

fn gossip_table(chain_id: &[u8]) -> String {
    format!("gossip_peers_{}", hex::encode(chain_id))
}

impl RepositoryImpl {
    /// Open (or create) a repository under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let repo = Self {
            db: sled::open(dir.join("state"))?,
            conn: Connection::open(dir.join("index.sqlite"))?,
            write_batch: BTreeMap::new(),
            main_chain_blocks: Vec::new(),
        };
        repo.init()?;
        info!("opened repository at {}", dir.display());
        Ok(repo)
    }

    /// Repository that lives only as long as the value.
    pub fn temporary() -> Result<Self> {
        let repo = Self {
            db: sled::Config::new().temporary(true).open()?,
            conn: Connection::open_in_memory()?,
            write_batch: BTreeMap::new(),
            main_chain_blocks: Vec::new(),
        };
        repo.init()?;
        Ok(repo)
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS main_chain_blocks (chain_id TEXT NOT NULL, block_number INTEGER NOT NULL, hash TEXT NOT NULL, timestamp INTEGER NOT NULL, miner TEXT NOT NULL, PRIMARY KEY(chain_id, block_number))",
            [],
        )?;
        Ok(())
    }

    /// Flushed best-chain blocks of `chain_id` from height `from` upwards.
    pub fn main_chain_block_range(&self, chain_id: &[u8], from: i64, limit: u32) -> Result<Vec<Block>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash FROM main_chain_blocks WHERE chain_id=?1 AND block_number>=?2 ORDER BY block_number LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![hex::encode(chain_id), from, limit], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            let hash = row?;
            let Ok(hash) = Sha256Hash::from_hex(&hash) else {
                continue;
            };
            if let Some(block) = self.get_block_by_hash(&hash)? {
                out.push(block);
            }
        }
        Ok(out)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn read_peers(&self, table: &str) -> Result<BTreeSet<PublicKey>> {
        if !self.table_exists(table)? {
            return Ok(BTreeSet::new());
        }
        let mut stmt = self.conn.prepare(&format!("SELECT pubkey FROM {table}"))?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut peers = BTreeSet::new();
        for row in rows {
            peers.insert(PublicKey::from_slice(&row?));
        }
        Ok(peers)
    }

    fn insert_peer(&self, table: &str, pk: &PublicKey) -> Result<()> {
        self.conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {table} (pubkey BLOB PRIMARY KEY)"),
            [],
        )?;
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (pubkey) VALUES (?1)"),
            params![pk.as_bytes()],
        )?;
        Ok(())
    }

    fn remove_peer(&self, table: &str, pk: &PublicKey) -> Result<()> {
        if self.table_exists(table)? {
            self.conn.execute(
                &format!("DELETE FROM {table} WHERE pubkey=?1"),
                params![pk.as_bytes()],
            )?;
        }
        Ok(())
    }

    /// Whether each noted block is on the best chain once staged writes land.
    fn main_chain_statuses(&self) -> Result<Vec<bool>> {
        let mut statuses = Vec::with_capacity(self.main_chain_blocks.len());
        for block in &self.main_chain_blocks {
            let main = self.get_main_chain_block_hash_by_number(block.chain_id(), block.block_number())?;
            statuses.push(main.as_ref() == Some(block.sha256()));
        }
        Ok(statuses)
    }
}

/// Bring `main_chain_blocks` in line with the height index for every block
/// whose best-chain membership changed.
fn index_main_chain_blocks<'a>(
    tx: &rusqlite::Transaction<'_>,
    blocks: impl Iterator<Item = (&'a Block, bool)>,
) -> Result<()> {
    for (block, on_main_chain) in blocks {
        let chain_id = hex::encode(block.chain_id());
        let hash = block.sha256().to_string();
        if on_main_chain {
            tx.execute(
                "INSERT OR REPLACE INTO main_chain_blocks (chain_id, block_number, hash, timestamp, miner) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![chain_id, block.block_number(), hash, block.timestamp(), block.miner().to_string()],
            )?;
        } else {
            tx.execute(
                "DELETE FROM main_chain_blocks WHERE chain_id=?1 AND block_number=?2 AND hash=?3",
                params![chain_id, block.block_number(), hash],
            )?;
        }
    }
    Ok(())
}

impl Repository for RepositoryImpl {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.write_batch.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put_value(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.write_batch.insert(key, Some(value));
        Ok(())
    }

    fn delete_value(&mut self, key: Vec<u8>) -> Result<()> {
        self.write_batch.insert(key, None);
        Ok(())
    }

    fn note_main_chain_block(&mut self, block: &Block) {
        self.main_chain_blocks.push(block.clone());
    }

    fn create_peer_db(&mut self, chain_id: &[u8]) -> Result<()> {
        for table in [peer_table(chain_id), gossip_table(chain_id)] {
            self.conn.execute(
                &format!("CREATE TABLE IF NOT EXISTS {table} (pubkey BLOB PRIMARY KEY)"),
                [],
            )?;
        }
        Ok(())
    }

    fn delete_peer_db(&mut self, chain_id: &[u8]) -> Result<()> {
        for table in [peer_table(chain_id), gossip_table(chain_id)] {
            self.conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        }
        Ok(())
    }

    fn get_all_peers(&self, chain_id: &[u8]) -> Result<BTreeSet<PublicKey>> {
        self.read_peers(&peer_table(chain_id))
    }

    fn add_peer_in_peer_db(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.insert_peer(&peer_table(chain_id), pk)
    }

    fn delete_peer_in_peer_db(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.remove_peer(&peer_table(chain_id), pk)
    }

    fn get_all_gossip_peers(&self, chain_id: &[u8]) -> Result<BTreeSet<PublicKey>> {
        self.read_peers(&gossip_table(chain_id))
    }

    fn add_gossip_peer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.insert_peer(&gossip_table(chain_id), pk)
    }

    fn delete_gossip_peer(&mut self, chain_id: &[u8], pk: &PublicKey) -> Result<()> {
        self.remove_peer(&gossip_table(chain_id), pk)
    }

    fn update_batch(
        &mut self,
        cache: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
        main_chain_blocks: Vec<Block>,
    ) -> Result<()> {
        debug!("staging {} writes from tracking session", cache.len());
        self.write_batch.extend(cache);
        self.main_chain_blocks.extend(main_chain_blocks);
        Ok(())
    }

    /// Write staged state to sled and the height index to SQLite. The
    /// SQLite transaction commits only after the sled batch applies, and
    /// staged writes are cleared only once both have landed; on error they
    /// stay staged for a retry or `rollback`.
    fn flush(&mut self) -> Result<()> {
        if self.write_batch.is_empty() && self.main_chain_blocks.is_empty() {
            return Ok(());
        }
        let statuses = self.main_chain_statuses()?;
        let mut batch = sled::Batch::default();
        for (key, value) in &self.write_batch {
            match value {
                Some(value) => batch.insert(key.as_slice(), value.as_slice()),
                None => batch.remove(key.as_slice()),
            }
        }

        let tx = self.conn.transaction()?;
        index_main_chain_blocks(&tx, self.main_chain_blocks.iter().zip(statuses))?;
        self.db.apply_batch(batch)?;
        tx.commit()?;
        self.db.flush()?;

        info!(
            "flushed {} writes, {} best-chain changes",
            self.write_batch.len(),
            self.main_chain_blocks.len()
        );
        self.write_batch.clear();
        self.main_chain_blocks.clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.flush()
    }

    fn rollback(&mut self) {
        debug!("discarding {} staged writes", self.write_batch.len());
        self.write_batch.clear();
        self.main_chain_blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::keys;
    use crate::repository::tests::{CHAIN, key, note_block};

    #[test]
    fn flushed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _) = key(7);
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        {
            let mut repo = RepositoryImpl::open(dir.path()).unwrap();
            repo.connect_tip_block(&b0).unwrap();
            repo.connect_tip_block(&b1).unwrap();
            repo.flush().unwrap();
        }
        let repo = RepositoryImpl::open(dir.path()).unwrap();
        assert_eq!(repo.get_best_tip_block_hash(CHAIN).unwrap(), Some(*b1.sha256()));
        assert_eq!(repo.get_account(CHAIN, &m).unwrap().balance(), 20);

        let range = repo.main_chain_block_range(CHAIN, 0, 10).unwrap();
        assert_eq!(range, vec![b0, b1]);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        repo.connect_tip_block(&b0).unwrap();
        assert!(repo.is_block_exist(b0.sha256()).unwrap());
        repo.rollback();
        assert!(!repo.is_block_exist(b0.sha256()).unwrap());
        assert!(repo.get_best_tip_block_hash(CHAIN).unwrap().is_none());
    }

    #[test]
    fn detached_blocks_leave_the_height_index() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        let b1 = note_block(Some(&b0), 7, 20);
        repo.connect_tip_block(&b0).unwrap();
        repo.connect_tip_block(&b1).unwrap();
        repo.flush().unwrap();
        repo.rollback_block(&b1).unwrap();
        repo.flush().unwrap();
        assert_eq!(repo.main_chain_block_range(CHAIN, 0, 10).unwrap(), vec![b0]);
    }

    #[test]
    fn peers_are_scoped_per_chain() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (a, _) = key(1);
        let (b, _) = key(2);
        assert!(repo.get_all_peers(CHAIN).unwrap().is_empty());
        repo.add_peer_in_peer_db(CHAIN, &a).unwrap();
        repo.add_peer_in_peer_db(CHAIN, &b).unwrap();
        repo.add_gossip_peer(CHAIN, &a).unwrap();
        assert_eq!(repo.get_all_peers(CHAIN).unwrap().len(), 2);
        assert!(repo.get_all_peers(b"other").unwrap().is_empty());
        assert!(repo.get_peer_randomly(CHAIN).unwrap().is_some());

        repo.delete_peer_in_peer_db(CHAIN, &a).unwrap();
        assert_eq!(repo.get_all_peers(CHAIN).unwrap().into_iter().collect::<Vec<_>>(), vec![b]);
        repo.delete_peer_db(CHAIN).unwrap();
        assert!(repo.get_all_gossip_peers(CHAIN).unwrap().is_empty());
    }

    #[test]
    fn failed_index_write_keeps_staged_state() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let b0 = note_block(None, 7, 10);
        repo.connect_tip_block(&b0).unwrap();
        repo.conn.execute("DROP TABLE main_chain_blocks", []).unwrap();

        assert!(repo.flush().is_err());
        assert!(repo.db.get(keys::block(b0.sha256())).unwrap().is_none());
        assert!(repo.is_block_exist(b0.sha256()).unwrap());
        assert_eq!(repo.get_best_tip_block_hash(CHAIN).unwrap(), Some(*b0.sha256()));

        repo.init().unwrap();
        repo.flush().unwrap();
        assert!(repo.db.get(keys::block(b0.sha256())).unwrap().is_some());
        assert_eq!(repo.main_chain_block_range(CHAIN, 0, 10).unwrap(), vec![b0]);
    }

    #[test]
    fn peer_mutations_are_not_staged() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (a, _) = key(1);
        let b0 = note_block(None, 7, 10);
        repo.connect_tip_block(&b0).unwrap();
        repo.add_peer_in_peer_db(CHAIN, &a).unwrap();
        repo.rollback();
        assert!(repo.get_best_tip_block_hash(CHAIN).unwrap().is_none());
        assert!(repo.get_all_peers(CHAIN).unwrap().contains(&a));
    }
}
