//! Fork choice: replace the best chain above a common ancestor with a
//! heavier branch.

use log::info;
use thiserror::Error;

use super::validation::{ValidationError, validate_block};
use super::{Block, MAX_REORG_DEPTH, Sha256Hash};
use crate::repository::{Repository, RepositoryError, RepositoryTrack};

#[derive(Debug, Error)]
pub enum ForkError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("branch is empty")]
    EmptyBranch,
    #[error("branch does not link at block {0}")]
    Discontinuous(Sha256Hash),
    #[error("fork point {0} is not on the best chain")]
    UnknownForkPoint(Sha256Hash),
    #[error("chain has no best tip")]
    EmptyChain,
    #[error("reorganisation depth {depth} exceeds {max}")]
    TooDeep { depth: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    /// The branch became the best chain.
    Switched,
    /// The current best chain is at least as heavy; nothing changed.
    Kept,
}

/// Try to make `branch` (blocks in ascending height, the first one a child
/// of a best-chain block) the best chain.
///
/// The old tip is rolled back to the fork point and every branch block is
/// validated and connected inside a tracking session. The session is
/// committed into `repo` only when the branch ends heavier than the old
/// tip; on any failure `repo` is left untouched. Flushing is up to the
/// caller.
pub fn switch_branch<R: Repository>(repo: &mut R, branch: &[Block]) -> Result<BranchOutcome, ForkError> {
    let (first, last) = match (branch.first(), branch.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ForkError::EmptyBranch),
    };
    for pair in branch.windows(2) {
        if pair[1].previous_block_root() != pair[0].sha256() || pair[1].chain_id() != first.chain_id() {
            return Err(ForkError::Discontinuous(*pair[1].sha256()));
        }
    }

    let chain_id = first.chain_id();
    let fork_point = *first.previous_block_root();
    let fork_block = repo
        .get_block_by_hash(&fork_point)?
        .ok_or(ForkError::UnknownForkPoint(fork_point))?;
    if repo.get_main_chain_block_hash_by_number(chain_id, fork_block.block_number())? != Some(fork_point) {
        return Err(ForkError::UnknownForkPoint(fork_point));
    }
    let old_tip = repo.get_best_tip_block(chain_id)?.ok_or(ForkError::EmptyChain)?;
    let depth = old_tip.block_number().saturating_sub(fork_block.block_number());
    if depth > MAX_REORG_DEPTH {
        return Err(ForkError::TooDeep {
            depth,
            max: MAX_REORG_DEPTH,
        });
    }

    let mut track = repo.start_tracking();
    match apply_branch(&mut track, &old_tip, &fork_point, branch) {
        Ok(()) if last.cumulative_difficulty() > old_tip.cumulative_difficulty() => {
            track.commit()?;
            info!(
                "switched to branch tip {} (rolled back {}, connected {})",
                last.sha256(),
                depth,
                branch.len()
            );
            Ok(BranchOutcome::Switched)
        }
        Ok(()) => {
            track.rollback();
            info!("kept tip {}, branch {} is not heavier", old_tip.sha256(), last.sha256());
            Ok(BranchOutcome::Kept)
        }
        Err(e) => {
            track.rollback();
            Err(e)
        }
    }
}

fn apply_branch(
    track: &mut RepositoryTrack<'_>,
    old_tip: &Block,
    fork_point: &Sha256Hash,
    branch: &[Block],
) -> Result<(), ForkError> {
    let mut cursor = old_tip.clone();
    while cursor.sha256() != fork_point {
        track.rollback_block(&cursor)?;
        let parent = *cursor.previous_block_root();
        cursor = track
            .get_block_by_hash(&parent)?
            .ok_or(RepositoryError::BlockNotFound(parent))?;
    }
    for block in branch {
        validate_block(&*track, block)?;
        track.connect_tip_block(block)?;
    }
    Ok(())
}
