use chrono::Utc;
use log::{debug, info};

use super::block::PostStates;
use super::consensus::{
    cumulative_difficulty, generation_signature, mining_time_interval, random_hit,
    required_base_target, verify_hit,
};
use super::validation::{ValidationError, expected_post_states, next_height, validate_transaction};
use super::{Block, BlockVersion, GENESIS_BASE_TARGET, Sha256Hash};
use crate::repository::Repository;
use crate::transaction::Transaction;
use crate::wallet::{PublicKey, SecretKey};

/// Assembles and signs blocks for one miner on one chain.
pub struct BlockBuilder {
    chain_id: Vec<u8>,
    miner: PublicKey,
    secret: SecretKey,
}

impl BlockBuilder {
    pub fn new(chain_id: Vec<u8>, miner: PublicKey, secret: SecretKey) -> Self {
        Self {
            chain_id,
            miner,
            secret,
        }
    }

    pub fn chain_id(&self) -> &[u8] {
        &self.chain_id
    }

    pub fn miner(&self) -> &PublicKey {
        &self.miner
    }

    /// Height-0 block minting `initial_balance` to the miner.
    pub fn genesis(&self, timestamp: i64, initial_balance: i64) -> Block {
        let mut tx = Transaction::new_note(
            self.chain_id.clone(),
            timestamp,
            self.miner,
            b"genesis".to_vec(),
        );
        tx.sign(&self.miner, &self.secret);

        let mut block = Block::new(
            BlockVersion::V1,
            self.chain_id.clone(),
            timestamp,
            0,
            Sha256Hash::GENESIS_SENTINEL,
            GENESIS_BASE_TARGET,
            0,
            generation_signature(&Sha256Hash::GENESIS_SENTINEL, &self.miner),
            tx,
            self.miner,
            PostStates {
                miner_balance: initial_balance,
                ..PostStates::default()
            },
        );
        block.sign(&self.miner, &self.secret);
        info!("created genesis {} for chain {}", block.sha256(), hex::encode(&self.chain_id));
        block
    }

    /// Earliest timestamp at which this miner may extend `parent`.
    pub fn next_eligible_timestamp<R>(&self, repo: &R, parent: &Block) -> Result<i64, ValidationError>
    where
        R: Repository + ?Sized,
    {
        let power = repo.get_effective_power(&self.chain_id, &self.miner)?;
        let hit = random_hit(&generation_signature(parent.generation_signature(), &self.miner));
        let wait = mining_time_interval(hit, parent.base_target(), power);
        parent
            .timestamp()
            .checked_add(wait)
            .ok_or(ValidationError::BadTimestamp {
                got: i64::MAX,
                parent: parent.timestamp(),
            })
    }

    /// Build a block embedding `tx` on top of the best tip at `timestamp`.
    pub fn build_at<R>(&self, repo: &R, tx: Transaction, timestamp: i64) -> Result<Block, ValidationError>
    where
        R: Repository + ?Sized,
    {
        let parent = repo
            .get_best_tip_block(&self.chain_id)?
            .ok_or(ValidationError::EmptyChain)?;
        validate_transaction(&tx, &self.chain_id)?;

        let interval = match timestamp.checked_sub(parent.timestamp()) {
            Some(interval) if interval > 0 => interval,
            _ => {
                return Err(ValidationError::BadTimestamp {
                    got: timestamp,
                    parent: parent.timestamp(),
                });
            }
        };
        let generation = generation_signature(parent.generation_signature(), &self.miner);
        let power = repo.get_effective_power(&self.chain_id, &self.miner)?;
        if !verify_hit(random_hit(&generation), parent.base_target(), power, interval) {
            return Err(ValidationError::NotEligible);
        }

        let base_target = required_base_target(parent.base_target(), interval);
        let difficulty = cumulative_difficulty(parent.cumulative_difficulty(), base_target);
        let states = expected_post_states(repo, &self.miner, &tx)?;

        let mut block = Block::new(
            BlockVersion::V1,
            self.chain_id.clone(),
            timestamp,
            next_height(&parent)?,
            *parent.sha256(),
            base_target,
            difficulty,
            generation,
            tx,
            self.miner,
            states,
        );
        block.sign(&self.miner, &self.secret);
        debug!("built block {} at {}", block.sha256(), block.block_number());
        Ok(block)
    }

    /// Build on the best tip at the current wall-clock time.
    pub fn build<R>(&self, repo: &R, tx: Transaction) -> Result<Block, ValidationError>
    where
        R: Repository + ?Sized,
    {
        let parent = repo
            .get_best_tip_block(&self.chain_id)?
            .ok_or(ValidationError::EmptyChain)?;
        let earliest = self.next_eligible_timestamp(repo, &parent)?;
        let now = Utc::now().timestamp();
        if now < earliest {
            return Err(ValidationError::NotYetEligible(earliest));
        }
        self.build_at(repo, tx, now)
    }

    /// A signed mining-only note from this miner.
    pub fn note(&self, timestamp: i64, payload: Vec<u8>) -> Transaction {
        let mut tx = Transaction::new_note(self.chain_id.clone(), timestamp, self.miner, payload);
        tx.sign(&self.miner, &self.secret);
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryImpl;
    use crate::wallet::keypair_from_seed;

    #[test]
    fn genesis_mints_to_miner() {
        let (miner, sk) = keypair_from_seed([9u8; 32]);
        let builder = BlockBuilder::new(b"test-chain".to_vec(), miner, sk);
        let genesis = builder.genesis(1_000, 500);
        assert!(genesis.is_genesis());
        assert!(genesis.verify_signature());
        assert_eq!(genesis.block_number(), 0);
        assert_eq!(genesis.account_state(&miner).unwrap().balance(), 500);
    }

    #[test]
    fn difficulty_accumulates_along_the_chain() {
        let (miner, sk) = keypair_from_seed([9u8; 32]);
        let builder = BlockBuilder::new(b"test-chain".to_vec(), miner, sk);
        let mut repo = RepositoryImpl::temporary().unwrap();
        repo.connect_tip_block(&builder.genesis(1_000, 500)).unwrap();

        let mut last = 0;
        for i in 0..5 {
            let tip = repo.get_best_tip_block(b"test-chain").unwrap().unwrap();
            let at = builder.next_eligible_timestamp(&repo, &tip).unwrap();
            let block = builder.build_at(&repo, builder.note(at, vec![i]), at).unwrap();
            assert!(block.cumulative_difficulty() > last);
            last = block.cumulative_difficulty();
            repo.connect_tip_block(&block).unwrap();
        }
        let tip = repo.get_best_tip_block(b"test-chain").unwrap().unwrap();
        assert_eq!(tip.block_number(), 5);
        assert_eq!(repo.get_effective_power(b"test-chain", &miner).unwrap(), 6);
    }

    #[test]
    fn empty_chain_cannot_be_extended() {
        let (miner, sk) = keypair_from_seed([9u8; 32]);
        let builder = BlockBuilder::new(b"test-chain".to_vec(), miner, sk);
        let repo = RepositoryImpl::temporary().unwrap();
        let tx = builder.note(0, vec![]);
        assert!(matches!(builder.build(&repo, tx), Err(ValidationError::EmptyChain)));
    }
}
