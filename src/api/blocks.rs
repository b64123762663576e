use actix_web::{HttpResponse, Responder, get, post, web};
use log::{debug, info, warn};

use super::models::{
    AppState, BlockResponse, SubmitBlockRequest, SubmitBlockResponse, internal_error, parse_hash,
};
use crate::blockchain::Block;
use crate::blockchain::validation::{
    ValidationError, validate_block, validate_block_header, validate_genesis,
};
use crate::repository::{BlockPlacement, Repository, RepositoryError, RepositoryImpl};

#[get("/blocks/{hash}/")]
pub async fn get_block(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let hash = match parse_hash(&path.into_inner()) {
        Ok(hash) => hash,
        Err(resp) => return resp,
    };
    let repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    match repo.get_block_by_hash(&hash) {
        Ok(Some(block)) => HttpResponse::Ok().json(BlockResponse::from(&block)),
        Ok(None) => HttpResponse::NotFound().body("no such block"),
        Err(e) => internal_error(e),
    }
}

enum Rejection {
    Invalid(ValidationError),
    Storage(RepositoryError),
}

impl From<ValidationError> for Rejection {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::Repository(e) => Rejection::Storage(e),
            e => Rejection::Invalid(e),
        }
    }
}

impl From<RepositoryError> for Rejection {
    fn from(e: RepositoryError) -> Self {
        Rejection::Storage(e)
    }
}

/// Place `block` according to where it attaches and stage the writes.
fn accept_block(repo: &mut RepositoryImpl, block: &Block) -> Result<BlockPlacement, Rejection> {
    let placement = repo.classify_block(block)?;
    match placement {
        BlockPlacement::ExtendsTip => {
            let has_tip = repo.get_best_tip_block_hash(block.chain_id())?.is_some();
            if has_tip || !block.is_genesis() {
                validate_block(&*repo, block)?;
            } else {
                validate_genesis(block)?;
            }
            repo.connect_tip_block(block)?;
        }
        BlockPlacement::ExtendsTail => {
            if !block.verify_signature() {
                return Err(Rejection::Invalid(ValidationError::BadBlockSignature));
            }
            repo.connect_tail_block(block)?;
        }
        BlockPlacement::Fork => {
            validate_block_header(&*repo, block)?;
            repo.save_block(block)?;
        }
        BlockPlacement::Stale => {}
    }
    Ok(placement)
}

/// Submit a hex-encoded signed block. It is validated, then connected at
/// the tip or tail, kept as a fork block, or rejected as stale.
#[post("/blocks/")]
pub async fn submit_block(
    state: web::Data<AppState>,
    req: web::Json<SubmitBlockRequest>,
) -> impl Responder {
    let block = match hex::decode(req.block.trim()) {
        Ok(bytes) => match Block::from_encode(&bytes) {
            Ok(block) => block,
            Err(e) => return HttpResponse::BadRequest().body(format!("bad block: {e}")),
        },
        Err(_) => return HttpResponse::BadRequest().body("block must be hex"),
    };
    debug!("received block {} at {}", block.sha256(), block.block_number());

    let mut repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    let placement = match accept_block(&mut repo, &block) {
        Ok(placement) => placement,
        Err(Rejection::Invalid(e)) => {
            repo.rollback();
            warn!("rejected block {}: {e}", block.sha256());
            return HttpResponse::BadRequest().body(e.to_string());
        }
        Err(Rejection::Storage(e)) => {
            repo.rollback();
            return internal_error(e);
        }
    };
    if let Err(e) = repo.flush() {
        repo.rollback();
        return internal_error(e);
    }

    let (accepted, label) = match placement {
        BlockPlacement::ExtendsTip => (true, "tip"),
        BlockPlacement::ExtendsTail => (true, "tail"),
        BlockPlacement::Fork => (true, "fork"),
        BlockPlacement::Stale => (false, "stale"),
    };
    if accepted {
        info!("accepted block {} as {}", block.sha256(), label);
    }
    let resp = SubmitBlockResponse {
        accepted,
        placement: label,
        hash: block.sha256().to_string(),
        block_number: block.block_number(),
    };
    if accepted {
        HttpResponse::Ok().json(resp)
    } else {
        HttpResponse::Conflict().json(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::builder::BlockBuilder;
    use crate::blockchain::consensus::generation_signature;
    use crate::blockchain::{BlockVersion, PostStates, Sha256Hash};
    use crate::codec::{Encodable, Entry};
    use crate::transaction::Transaction;
    use crate::wallet::keypair_from_seed;

    const CHAIN: &[u8] = b"api-chain";

    #[test]
    fn forged_genesis_is_not_connected() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (miner, miner_sk) = keypair_from_seed([4u8; 32]);
        let tx = Transaction::new_note(CHAIN.to_vec(), 1_000, miner, b"genesis".to_vec());
        let mut forged = Block::new(
            BlockVersion::V1,
            CHAIN.to_vec(),
            1_000,
            i64::MAX,
            Sha256Hash::GENESIS_SENTINEL,
            1,
            0,
            generation_signature(&Sha256Hash::GENESIS_SENTINEL, &miner),
            tx,
            miner,
            PostStates {
                miner_balance: -5,
                ..PostStates::default()
            },
        );
        forged.sign(&miner, &miner_sk);

        assert!(matches!(
            accept_block(&mut repo, &forged),
            Err(Rejection::Invalid(_))
        ));
        repo.rollback();
        assert!(repo.get_best_tip_block_hash(CHAIN).unwrap().is_none());
        assert!(!repo.is_block_exist(forged.sha256()).unwrap());
    }

    #[test]
    fn padded_block_keeps_its_identity() {
        let mut repo = RepositoryImpl::temporary().unwrap();
        let (miner, miner_sk) = keypair_from_seed([4u8; 32]);
        let builder = BlockBuilder::new(CHAIN.to_vec(), miner, miner_sk);
        let genesis = builder.genesis(1_000, 1_000);

        let mut padded = genesis.get_entry();
        padded.insert("zz", Entry::Bytes(b"padding".to_vec()));
        let relayed = Block::from_encode(&padded.encode()).unwrap();
        assert_eq!(relayed.sha256(), genesis.sha256());
        assert!(matches!(
            accept_block(&mut repo, &relayed),
            Ok(BlockPlacement::ExtendsTip)
        ));

        let tip = repo.get_best_tip_block(CHAIN).unwrap().unwrap();
        let at = builder.next_eligible_timestamp(&repo, &tip).unwrap();
        let child = builder.build_at(&repo, builder.note(at, vec![]), at).unwrap();
        assert!(matches!(
            accept_block(&mut repo, &child),
            Ok(BlockPlacement::ExtendsTip)
        ));
        assert_eq!(repo.get_best_tip_block_hash(CHAIN).unwrap(), Some(*child.sha256()));
    }
}
