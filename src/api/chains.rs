use actix_web::{HttpResponse, Responder, get, post, web};
use chrono::Utc;
use log::{debug, info, warn};

use super::models::{
    AccountResponse, AppState, BlockResponse, ChainsResponse, GenesisRequest, MineRequest,
    NotEligibleResponse, RangeQuery, RangeResponse, StatsResponse, internal_error, parse_chain_id,
    parse_public_key, parse_secret_key,
};
use crate::blockchain::builder::BlockBuilder;
use crate::blockchain::validation::ValidationError;
use crate::blockchain::{Block, DEFAULT_BLOCK_TIME};
use crate::repository::{Repository, RepositoryImpl};
use crate::transaction::Transaction;

const DEFAULT_RANGE_LIMIT: u32 = 20;
const MAX_RANGE_LIMIT: u32 = 100;
/// Blocks averaged over for `avg_interval_secs`.
const STATS_WINDOW: u32 = 10;

/// List every known chain id.
#[get("/chains/")]
pub async fn list_chains(state: web::Data<AppState>) -> impl Responder {
    let repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    match repo.get_chains() {
        Ok(chains) => HttpResponse::Ok().json(ChainsResponse {
            chains: chains.iter().map(hex::encode).collect(),
        }),
        Err(e) => internal_error(e),
    }
}

/// Create a chain by connecting a genesis block minted to the caller.
#[post("/chains/")]
pub async fn create_chain(
    state: web::Data<AppState>,
    req: web::Json<GenesisRequest>,
) -> impl Responder {
    let chain_id = match parse_chain_id(&req.chain_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let (miner, secret) = match parse_secret_key(&req.secret_key) {
        Ok(keys) => keys,
        Err(resp) => return resp,
    };
    if req.initial_balance < 0 {
        return HttpResponse::BadRequest().body("initial_balance must be >= 0");
    }

    let mut repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    match repo.get_best_tip_block_hash(&chain_id) {
        Ok(Some(_)) => return HttpResponse::Conflict().body("chain already exists"),
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }

    let builder = BlockBuilder::new(chain_id, miner, secret);
    let genesis = builder.genesis(
        req.timestamp.unwrap_or_else(|| Utc::now().timestamp()),
        req.initial_balance,
    );
    if let Err(e) = repo.connect_tip_block(&genesis).and_then(|_| repo.flush()) {
        repo.rollback();
        return internal_error(e);
    }
    info!("chain {} created by {}", hex::encode(builder.chain_id()), miner);
    HttpResponse::Ok().json(BlockResponse::from(&genesis))
}

fn block_or_not_found(found: crate::repository::Result<Option<Block>>) -> HttpResponse {
    match found {
        Ok(Some(block)) => HttpResponse::Ok().json(BlockResponse::from(&block)),
        Ok(None) => HttpResponse::NotFound().body("no such block"),
        Err(e) => internal_error(e),
    }
}

#[get("/chains/{chain}/tip/")]
pub async fn get_tip(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let chain_id = match parse_chain_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.repository() {
        Ok(repo) => block_or_not_found(repo.get_best_tip_block(&chain_id)),
        Err(resp) => resp,
    }
}

#[get("/chains/{chain}/tail/")]
pub async fn get_tail(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let chain_id = match parse_chain_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.repository() {
        Ok(repo) => block_or_not_found(repo.get_best_tail_block(&chain_id)),
        Err(resp) => resp,
    }
}

/// Best-chain blocks from height `from` (default: the tail) upwards.
#[get("/chains/{chain}/blocks/")]
pub async fn get_block_range(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let chain_id = match parse_chain_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let limit = query.limit.unwrap_or(DEFAULT_RANGE_LIMIT).min(MAX_RANGE_LIMIT);

    let repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    let from = match query.from {
        Some(from) => from,
        None => match repo.get_best_tail_block(&chain_id) {
            Ok(tail) => tail.map(|b| b.block_number()).unwrap_or_default(),
            Err(e) => return internal_error(e),
        },
    };
    match repo.main_chain_block_range(&chain_id, from, limit) {
        Ok(blocks) => HttpResponse::Ok().json(RangeResponse {
            from,
            blocks: blocks.iter().map(BlockResponse::from).collect(),
        }),
        Err(e) => internal_error(e),
    }
}

/// Account state as of the best tip, with its current effective power.
#[get("/chains/{chain}/accounts/{pubkey}/")]
pub async fn get_account(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (chain, pubkey) = path.into_inner();
    let chain_id = match parse_chain_id(&chain) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let pk = match parse_public_key(&pubkey) {
        Ok(pk) => pk,
        Err(resp) => return resp,
    };
    let repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    match repo.get_account_with_effective_power(&chain_id, &pk) {
        Ok(account) => HttpResponse::Ok().json(AccountResponse::new(&chain_id, &pk, &account)),
        Err(e) => internal_error(e),
    }
}

type StatsSnapshot = (Option<Block>, Option<Block>, usize, Vec<Block>);

fn stats_snapshot(repo: &RepositoryImpl, chain_id: &[u8]) -> crate::repository::Result<StatsSnapshot> {
    let tip = repo.get_best_tip_block(chain_id)?;
    let tail = repo.get_best_tail_block(chain_id)?;
    let peers = repo.get_all_peers(chain_id)?.len();
    let recent = match &tip {
        Some(tip) => repo.main_chain_block_range(
            chain_id,
            tip.block_number().saturating_sub(i64::from(STATS_WINDOW)).max(0),
            STATS_WINDOW + 1,
        )?,
        None => Vec::new(),
    };
    Ok((tip, tail, peers, recent))
}

#[get("/chains/{chain}/stats/")]
pub async fn get_stats(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let chain_id = match parse_chain_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };

    let (tip, tail, peers, recent) = match stats_snapshot(&repo, &chain_id) {
        Ok((Some(tip), tail, peers, recent)) => (tip, tail, peers, recent),
        Ok((None, ..)) => return HttpResponse::NotFound().body("unknown chain"),
        Err(e) => return internal_error(e),
    };
    drop(repo);

    let intervals: Vec<i64> = recent
        .windows(2)
        .map(|pair| pair[1].timestamp().saturating_sub(pair[0].timestamp()).max(0))
        .collect();
    let avg_interval_secs = (!intervals.is_empty())
        .then(|| intervals.iter().sum::<i64>() as f64 / intervals.len() as f64);

    HttpResponse::Ok().json(StatsResponse {
        chain_id: hex::encode(&chain_id),
        tip_block_number: tip.block_number(),
        tail_block_number: tail.map(|b| b.block_number()).unwrap_or_default(),
        cumulative_difficulty: tip.cumulative_difficulty(),
        base_target: tip.base_target(),
        target_block_time_secs: DEFAULT_BLOCK_TIME,
        last_interval_secs: intervals.last().copied(),
        avg_interval_secs,
        peers,
    })
}

/// Mine the next block on the chain with the caller's key, embedding either
/// the given signed transaction or a note.
#[post("/chains/{chain}/mine/")]
pub async fn mine_block(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<MineRequest>,
) -> impl Responder {
    let chain_id = match parse_chain_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let (miner, secret) = match parse_secret_key(&req.secret_key) {
        Ok(keys) => keys,
        Err(resp) => return resp,
    };
    let builder = BlockBuilder::new(chain_id, miner, secret);

    let tx = match &req.transaction {
        Some(encoded) => match hex::decode(encoded)
            .map_err(|e| e.to_string())
            .and_then(|bytes| Transaction::from_encode(&bytes).map_err(|e| e.to_string()))
        {
            Ok(tx) => tx,
            Err(e) => return HttpResponse::BadRequest().body(format!("bad transaction: {e}")),
        },
        None => builder.note(
            Utc::now().timestamp(),
            req.note.clone().unwrap_or_default().into_bytes(),
        ),
    };

    let mut repo = match state.repository() {
        Ok(repo) => repo,
        Err(resp) => return resp,
    };
    let block = match builder.build(&*repo, tx) {
        Ok(block) => block,
        Err(ValidationError::NotYetEligible(eligible_at)) => {
            debug!("miner {} not eligible until {}", miner, eligible_at);
            return HttpResponse::TooManyRequests().json(NotEligibleResponse { eligible_at });
        }
        Err(ValidationError::Repository(e)) => return internal_error(e),
        Err(e) => {
            warn!("mining rejected: {e}");
            return HttpResponse::BadRequest().body(e.to_string());
        }
    };

    if let Err(e) = repo.connect_tip_block(&block).and_then(|_| repo.flush()) {
        repo.rollback();
        return internal_error(e);
    }
    info!("mined block {} at {} by {}", block.sha256(), block.block_number(), miner);
    HttpResponse::Ok().json(BlockResponse::from(&block))
}
