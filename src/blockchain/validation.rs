//! Checks a candidate must pass before any repository state transition.

use std::collections::BTreeMap;

use thiserror::Error;

use super::block::PostStates;
use super::consensus::{
    cumulative_difficulty, generation_signature, random_hit, required_base_target, verify_hit,
};
use super::{Block, BlockVersion, GENESIS_BASE_TARGET, Sha256Hash};
use crate::repository::{Repository, RepositoryError};
use crate::transaction::{Transaction, TxVersion};
use crate::wallet::PublicKey;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("unsupported version {0}")]
    UnsupportedVersion(i32),
    #[error("chain id does not match")]
    ChainMismatch,
    #[error("transaction signature does not verify")]
    BadTransactionSignature,
    #[error("block signature does not verify")]
    BadBlockSignature,
    #[error("amount and fee must be non-negative")]
    NegativeValue,
    #[error("sender and receiver are the same account")]
    SelfTransfer,
    #[error("chain has no best tip")]
    EmptyChain,
    #[error("parent block {0} is unknown")]
    UnknownParent(Sha256Hash),
    #[error("parent block {0} is not the best tip")]
    NotOnTip(Sha256Hash),
    #[error("block height {got}, expected {expected}")]
    BadHeight { got: i64, expected: i64 },
    #[error("parent height {0} has no successor")]
    HeightOverflow(i64),
    #[error("timestamp {got} is not after parent timestamp {parent}")]
    BadTimestamp { got: i64, parent: i64 },
    #[error("generation signature does not derive from parent")]
    BadGenerationSignature,
    #[error("base target {got}, expected {expected}")]
    BadBaseTarget { got: u64, expected: u64 },
    #[error("cumulative difficulty {got}, expected {expected}")]
    BadCumulativeDifficulty { got: u64, expected: u64 },
    #[error("miner is not eligible at this timestamp")]
    NotEligible,
    #[error("miner becomes eligible at {0}")]
    NotYetEligible(i64),
    #[error("nonce {got}, expected {expected}")]
    BadNonce { got: i64, expected: i64 },
    #[error("balance {balance} cannot cover {needed}")]
    InsufficientBalance { balance: i64, needed: i64 },
    #[error("post-state of {0} does not match its pre-state")]
    PostStateMismatch(PublicKey),
    #[error("genesis block must extend the zero hash")]
    NotGenesis,
    #[error("genesis transaction must be a note from the miner")]
    BadGenesisTransaction,
    #[error("genesis post-state of {0} is negative")]
    NegativeGenesisState(PublicKey),
}

/// Seconds from `parent` to `block`, rejecting non-increasing or
/// overflowing timestamps.
fn block_interval(parent: &Block, block: &Block) -> Result<i64, ValidationError> {
    match block.timestamp().checked_sub(parent.timestamp()) {
        Some(interval) if interval > 0 => Ok(interval),
        _ => Err(ValidationError::BadTimestamp {
            got: block.timestamp(),
            parent: parent.timestamp(),
        }),
    }
}

/// Height of the child of `parent`.
pub fn next_height(parent: &Block) -> Result<i64, ValidationError> {
    parent
        .block_number()
        .checked_add(1)
        .ok_or(ValidationError::HeightOverflow(parent.block_number()))
}

/// Stateless transaction checks.
pub fn validate_transaction(tx: &Transaction, chain_id: &[u8]) -> Result<(), ValidationError> {
    if tx.version() != TxVersion::V1 {
        return Err(ValidationError::UnsupportedVersion(tx.version().id()));
    }
    if tx.chain_id() != chain_id {
        return Err(ValidationError::ChainMismatch);
    }
    if !tx.verify_signature() {
        return Err(ValidationError::BadTransactionSignature);
    }
    if tx.is_transfer() {
        if tx.amount() < 0 || tx.fee() < 0 {
            return Err(ValidationError::NegativeValue);
        }
        if tx.sender() == tx.receiver() {
            return Err(ValidationError::SelfTransfer);
        }
    }
    Ok(())
}

/// Post-states that applying `tx` mined by `miner` to the repository's
/// current best-chain state yields.
///
/// Effects are applied per account, so a key filling several roles sees
/// all of them.
pub fn expected_post_states<R>(
    repo: &R,
    miner: &PublicKey,
    tx: &Transaction,
) -> Result<PostStates, ValidationError>
where
    R: Repository + ?Sized,
{
    let chain_id = tx.chain_id();
    let mut ledger = BTreeMap::new();
    for pk in [miner, tx.sender(), tx.receiver()] {
        if !ledger.contains_key(pk) {
            let account = repo.get_account(chain_id, pk)?;
            ledger.insert(*pk, (account.balance(), account.nonce()));
        }
    }

    if tx.is_transfer() {
        let (balance, nonce) = ledger[tx.sender()];
        if tx.nonce() != nonce {
            return Err(ValidationError::BadNonce {
                got: tx.nonce(),
                expected: nonce,
            });
        }
        let needed = tx
            .amount()
            .checked_add(tx.fee())
            .ok_or(ValidationError::NegativeValue)?;
        if balance < needed {
            return Err(ValidationError::InsufficientBalance { balance, needed });
        }
        if let Some(sender) = ledger.get_mut(tx.sender()) {
            sender.0 -= needed;
            sender.1 += 1;
        }
        if let Some(receiver) = ledger.get_mut(tx.receiver()) {
            receiver.0 += tx.amount();
        }
        if let Some(m) = ledger.get_mut(miner) {
            m.0 += tx.fee();
        }
    }

    let (miner_balance, miner_nonce) = ledger[miner];
    let mut states = PostStates {
        miner_balance,
        miner_nonce,
        ..PostStates::default()
    };
    if tx.is_transfer() {
        (states.sender_balance, states.sender_nonce) = ledger[tx.sender()];
        (states.receiver_balance, states.receiver_nonce) = ledger[tx.receiver()];
    }
    Ok(states)
}

/// Checks for a height-0 block opening an empty chain: a signed note from
/// the miner, sentinel parent, genesis consensus fields and non-negative
/// post-states.
pub fn validate_genesis(block: &Block) -> Result<(), ValidationError> {
    if block.version() != BlockVersion::V1 {
        return Err(ValidationError::UnsupportedVersion(block.version().id()));
    }
    if !block.verify_signature() {
        return Err(ValidationError::BadBlockSignature);
    }
    if !block.is_genesis() {
        return Err(ValidationError::NotGenesis);
    }
    let tx = block.tx();
    validate_transaction(tx, block.chain_id())?;
    if tx.is_transfer() || tx.sender() != block.miner() {
        return Err(ValidationError::BadGenesisTransaction);
    }
    if block.block_number() != 0 {
        return Err(ValidationError::BadHeight {
            got: block.block_number(),
            expected: 0,
        });
    }
    if block.base_target() != GENESIS_BASE_TARGET {
        return Err(ValidationError::BadBaseTarget {
            got: block.base_target(),
            expected: GENESIS_BASE_TARGET,
        });
    }
    if block.cumulative_difficulty() != 0 {
        return Err(ValidationError::BadCumulativeDifficulty {
            got: block.cumulative_difficulty(),
            expected: 0,
        });
    }
    if *block.generation_signature()
        != generation_signature(&Sha256Hash::GENESIS_SENTINEL, block.miner())
    {
        return Err(ValidationError::BadGenerationSignature);
    }
    if block.miner_balance() < 0 || block.miner_nonce() < 0 {
        return Err(ValidationError::NegativeGenesisState(*block.miner()));
    }
    Ok(())
}

/// Checks that hold wherever the block sits: signatures, parent linkage and
/// the consensus fields derived from the parent. Returns the parent.
pub fn validate_block_header<R>(repo: &R, block: &Block) -> Result<Block, ValidationError>
where
    R: Repository + ?Sized,
{
    if block.version() != BlockVersion::V1 {
        return Err(ValidationError::UnsupportedVersion(block.version().id()));
    }
    if !block.verify_signature() {
        return Err(ValidationError::BadBlockSignature);
    }
    validate_transaction(block.tx(), block.chain_id())?;

    let parent = repo
        .get_block_by_hash(block.previous_block_root())?
        .ok_or(ValidationError::UnknownParent(*block.previous_block_root()))?;
    if parent.chain_id() != block.chain_id() {
        return Err(ValidationError::ChainMismatch);
    }
    let height = next_height(&parent)?;
    if block.block_number() != height {
        return Err(ValidationError::BadHeight {
            got: block.block_number(),
            expected: height,
        });
    }
    let interval = block_interval(&parent, block)?;
    if *block.generation_signature()
        != generation_signature(parent.generation_signature(), block.miner())
    {
        return Err(ValidationError::BadGenerationSignature);
    }
    let base_target = required_base_target(parent.base_target(), interval);
    if block.base_target() != base_target {
        return Err(ValidationError::BadBaseTarget {
            got: block.base_target(),
            expected: base_target,
        });
    }
    let difficulty = cumulative_difficulty(parent.cumulative_difficulty(), block.base_target());
    if block.cumulative_difficulty() != difficulty {
        return Err(ValidationError::BadCumulativeDifficulty {
            got: block.cumulative_difficulty(),
            expected: difficulty,
        });
    }
    Ok(parent)
}

/// Full validation of a block extending the current best tip: header,
/// proof-of-stake hit and post-state arithmetic.
pub fn validate_block<R>(repo: &R, block: &Block) -> Result<(), ValidationError>
where
    R: Repository + ?Sized,
{
    let parent = validate_block_header(repo, block)?;
    let chain_id = block.chain_id();
    if repo.get_best_tip_block_hash(chain_id)?.as_ref() != Some(parent.sha256()) {
        return Err(ValidationError::NotOnTip(*parent.sha256()));
    }

    let power = repo.get_effective_power(chain_id, block.miner())?;
    let hit = random_hit(block.generation_signature());
    let interval = block_interval(&parent, block)?;
    if !verify_hit(hit, parent.base_target(), power, interval) {
        return Err(ValidationError::NotEligible);
    }

    let expected = expected_post_states(repo, block.miner(), block.tx())?;
    let tx = block.tx();
    if (block.miner_balance(), block.miner_nonce()) != (expected.miner_balance, expected.miner_nonce)
    {
        return Err(ValidationError::PostStateMismatch(*block.miner()));
    }
    if tx.is_transfer() {
        if (block.sender_balance(), block.sender_nonce())
            != (expected.sender_balance, expected.sender_nonce)
        {
            return Err(ValidationError::PostStateMismatch(*tx.sender()));
        }
        if (block.receiver_balance(), block.receiver_nonce())
            != (expected.receiver_balance, expected.receiver_nonce)
        {
            return Err(ValidationError::PostStateMismatch(*tx.receiver()));
        }
    }
    Ok(())
}
