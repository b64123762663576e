use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};

use actix_web::HttpResponse;
use log::error;
use serde::{Deserialize, Serialize};

use crate::blockchain::{Account, Block, Sha256Hash};
use crate::codec::{Encodable, fixed_bytes};
use crate::repository::RepositoryImpl;
use crate::transaction::{Transaction, TxType};
use crate::wallet::{PublicKey, SecretKey, keypair_from_seed};

/// Shared application state: one durable repository behind a mutex.
pub struct AppState {
    repository: Mutex<RepositoryImpl>,
}

impl AppState {
    pub fn new(repository: RepositoryImpl) -> Self {
        Self {
            repository: Mutex::new(repository),
        }
    }

    pub fn repository(&self) -> Result<MutexGuard<'_, RepositoryImpl>, HttpResponse> {
        self.repository.lock().map_err(|_| {
            error!("repository mutex poisoned");
            HttpResponse::InternalServerError().body("repository unavailable")
        })
    }
}

pub fn internal_error(e: impl Display) -> HttpResponse {
    error!("{e}");
    HttpResponse::InternalServerError().body(e.to_string())
}

/* ---------- Request parsing ---------- */

pub fn parse_chain_id(s: &str) -> Result<Vec<u8>, HttpResponse> {
    match hex::decode(s) {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(HttpResponse::BadRequest().body("chain id must be non-empty hex")),
    }
}

pub fn parse_hash(s: &str) -> Result<Sha256Hash, HttpResponse> {
    Sha256Hash::from_hex(s).map_err(|e| HttpResponse::BadRequest().body(e))
}

pub fn parse_public_key(s: &str) -> Result<PublicKey, HttpResponse> {
    PublicKey::from_hex(s).map_err(|e| HttpResponse::BadRequest().body(e))
}

/// Keypair from a hex-encoded 32-byte secret seed.
pub fn parse_secret_key(s: &str) -> Result<(PublicKey, SecretKey), HttpResponse> {
    match hex::decode(s.trim()) {
        Ok(bytes) if bytes.len() == 32 => Ok(keypair_from_seed(fixed_bytes(&bytes))),
        _ => Err(HttpResponse::BadRequest().body("secret_key must be 32 bytes of hex")),
    }
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize)]
pub struct ChainsResponse {
    pub chains: Vec<String>,
}

#[derive(Deserialize)]
pub struct GenesisRequest {
    /// Hex chain id.
    pub chain_id: String,
    pub secret_key: String,
    pub initial_balance: i64,
    pub timestamp: Option<i64>,
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub from: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
pub struct RangeResponse {
    pub from: i64,
    pub blocks: Vec<BlockResponse>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub chain_id: String,
    pub tip_block_number: i64,
    pub tail_block_number: i64,
    pub cumulative_difficulty: u64,
    pub base_target: u64,
    pub target_block_time_secs: i64,
    pub last_interval_secs: Option<i64>,
    pub avg_interval_secs: Option<f64>,
    pub peers: usize,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub chain_id: String,
    pub public_key: String,
    pub balance: i64,
    pub nonce: i64,
    pub note_timestamp: i64,
    pub effective_power: i64,
    pub block_number: i64,
}

impl AccountResponse {
    pub fn new(chain_id: &[u8], pk: &PublicKey, account: &Account) -> Self {
        Self {
            chain_id: hex::encode(chain_id),
            public_key: pk.to_string(),
            balance: account.balance(),
            nonce: account.nonce(),
            note_timestamp: account.note_timestamp(),
            effective_power: account.effective_power(),
            block_number: account.block_number(),
        }
    }
}

/* ---------- Block API Models ---------- */

#[derive(Serialize)]
pub struct TransactionResponse {
    pub hash: Option<String>,
    pub tx_type: i32,
    pub timestamp: i64,
    pub sender: String,
    pub receiver: Option<String>,
    pub nonce: i64,
    pub fee: i64,
    pub amount: i64,
    pub payload: String,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.sha256().map(ToString::to_string),
            tx_type: tx.tx_type().id(),
            timestamp: tx.timestamp(),
            sender: tx.sender().to_string(),
            receiver: (tx.tx_type() == TxType::Transfer).then(|| tx.receiver().to_string()),
            nonce: tx.nonce(),
            fee: tx.fee(),
            amount: tx.amount(),
            payload: hex::encode(tx.payload()),
        }
    }
}

#[derive(Serialize)]
pub struct BlockResponse {
    pub hash: String,
    pub version: i32,
    pub chain_id: String,
    pub timestamp: i64,
    pub block_number: i64,
    pub previous_block_root: String,
    pub base_target: u64,
    pub cumulative_difficulty: u64,
    pub generation_signature: String,
    pub miner: String,
    pub miner_balance: i64,
    pub miner_nonce: i64,
    pub sender_balance: i64,
    pub sender_nonce: i64,
    pub receiver_balance: i64,
    pub receiver_nonce: i64,
    pub tx: TransactionResponse,
    /// Hex of the signed canonical encoding, accepted back by `POST /blocks/`.
    pub encoded: String,
}

impl From<&Block> for BlockResponse {
    fn from(b: &Block) -> Self {
        Self {
            hash: b.sha256().to_string(),
            version: b.version().id(),
            chain_id: hex::encode(b.chain_id()),
            timestamp: b.timestamp(),
            block_number: b.block_number(),
            previous_block_root: b.previous_block_root().to_string(),
            base_target: b.base_target(),
            cumulative_difficulty: b.cumulative_difficulty(),
            generation_signature: b.generation_signature().to_string(),
            miner: b.miner().to_string(),
            miner_balance: b.miner_balance(),
            miner_nonce: b.miner_nonce(),
            sender_balance: b.sender_balance(),
            sender_nonce: b.sender_nonce(),
            receiver_balance: b.receiver_balance(),
            receiver_nonce: b.receiver_nonce(),
            tx: TransactionResponse::from(b.tx()),
            encoded: hex::encode(b.get_encode()),
        }
    }
}

#[derive(Deserialize)]
pub struct SubmitBlockRequest {
    /// Hex of the signed canonical block encoding.
    pub block: String,
}

#[derive(Serialize)]
pub struct SubmitBlockResponse {
    pub accepted: bool,
    pub placement: &'static str,
    pub hash: String,
    pub block_number: i64,
}

/* ---------- Mining API Models ---------- */

#[derive(Deserialize)]
pub struct MineRequest {
    pub secret_key: String,
    /// Hex of a signed transaction to embed; a note is mined when absent.
    pub transaction: Option<String>,
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct NotEligibleResponse {
    pub eligible_at: i64,
}
