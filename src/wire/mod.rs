//! Tagged envelopes multiplexing every payload kind over one channel.

use std::cmp::Ordering;

use thiserror::Error;

use crate::blockchain::{Block, Sha256Hash, Vote};
use crate::codec::{CodecError, Encodable, Entry};
use crate::communication::Message;
use crate::transaction::Transaction;
use crate::wallet::PublicKey;

const PROTOCOL_TYPE: &str = "pid";
const PROTOCOL_PAYLOAD: &str = "p";
const ENTRY_TYPE: &str = "t";
const ENTRY_VALUE: &str = "v";
const ENTRY_CHAIN_ID: &str = "i";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unknown data type id {0}")]
    UnknownDataType(i64),
    #[error("unknown protocol id {0}")]
    UnknownProtocol(i64),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    Message(Message),
    /// First byte of each ordered message hash, for set reconciliation.
    LevenshteinArray(Vec<u8>),
    FriendInfoRequest,
    FriendInfo(Vec<u8>),
    BlockRequest(Sha256Hash),
    Block(Box<Block>),
    TransactionRequest(Sha256Hash),
    Transaction(Transaction),
    VoteRequest(Vec<u8>),
    Vote { chain_id: Vec<u8>, vote: Vote },
    HeadBlockRequest(Vec<u8>),
}

impl EntryPayload {
    pub const MESSAGE: i64 = 0;
    pub const LEVENSHTEIN_ARRAY: i64 = 1;
    pub const FRIEND_INFO_REQUEST: i64 = 2;
    pub const FRIEND_INFO: i64 = 3;
    pub const BLOCK_REQUEST: i64 = 4;
    pub const BLOCK: i64 = 5;
    pub const TRANSACTION_REQUEST: i64 = 6;
    pub const TRANSACTION: i64 = 7;
    pub const VOTE_REQUEST: i64 = 8;
    pub const VOTE: i64 = 9;
    pub const HEAD_BLOCK_REQUEST: i64 = 10;

    pub fn data_type_id(&self) -> i64 {
        match self {
            EntryPayload::Message(_) => Self::MESSAGE,
            EntryPayload::LevenshteinArray(_) => Self::LEVENSHTEIN_ARRAY,
            EntryPayload::FriendInfoRequest => Self::FRIEND_INFO_REQUEST,
            EntryPayload::FriendInfo(_) => Self::FRIEND_INFO,
            EntryPayload::BlockRequest(_) => Self::BLOCK_REQUEST,
            EntryPayload::Block(_) => Self::BLOCK,
            EntryPayload::TransactionRequest(_) => Self::TRANSACTION_REQUEST,
            EntryPayload::Transaction(_) => Self::TRANSACTION,
            EntryPayload::VoteRequest(_) => Self::VOTE_REQUEST,
            EntryPayload::Vote { .. } => Self::VOTE,
            EntryPayload::HeadBlockRequest(_) => Self::HEAD_BLOCK_REQUEST,
        }
    }

    pub fn from_entry(e: &Entry) -> Result<Self, WireError> {
        let type_id = e.int_at(ENTRY_TYPE).ok_or(WireError::MissingField(ENTRY_TYPE))?;
        let value = || e.find_key(ENTRY_VALUE).ok_or(WireError::MissingField(ENTRY_VALUE));
        let bytes = || e.bytes_at(ENTRY_VALUE).map(<[u8]>::to_vec).unwrap_or_default();
        let hash = || e.bytes_at(ENTRY_VALUE).map(Sha256Hash::from_slice).unwrap_or_default();
        let chain_id = || e.bytes_at(ENTRY_CHAIN_ID).map(<[u8]>::to_vec).unwrap_or_default();

        let payload = match type_id {
            Self::MESSAGE => EntryPayload::Message(Message::from_entry(value()?)),
            Self::LEVENSHTEIN_ARRAY => EntryPayload::LevenshteinArray(bytes()),
            Self::FRIEND_INFO_REQUEST => EntryPayload::FriendInfoRequest,
            Self::FRIEND_INFO => EntryPayload::FriendInfo(bytes()),
            Self::BLOCK_REQUEST => EntryPayload::BlockRequest(hash()),
            Self::BLOCK => EntryPayload::Block(Box::new(Block::from_entry(value()?))),
            Self::TRANSACTION_REQUEST => EntryPayload::TransactionRequest(hash()),
            Self::TRANSACTION => EntryPayload::Transaction(Transaction::from_entry(value()?)),
            Self::VOTE_REQUEST => EntryPayload::VoteRequest(chain_id()),
            Self::VOTE => EntryPayload::Vote {
                chain_id: chain_id(),
                vote: Vote::from_entry(value()?),
            },
            Self::HEAD_BLOCK_REQUEST => EntryPayload::HeadBlockRequest(chain_id()),
            other => return Err(WireError::UnknownDataType(other)),
        };
        Ok(payload)
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, WireError> {
        Self::from_entry(&Entry::decode(encode)?)
    }
}

impl Encodable for EntryPayload {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert(ENTRY_TYPE, Entry::Int(self.data_type_id()));
        match self {
            EntryPayload::Message(msg) => e.insert(ENTRY_VALUE, msg.get_entry()),
            EntryPayload::LevenshteinArray(bytes) | EntryPayload::FriendInfo(bytes) => {
                e.insert(ENTRY_VALUE, Entry::Bytes(bytes.clone()))
            }
            EntryPayload::FriendInfoRequest => {}
            EntryPayload::BlockRequest(hash) | EntryPayload::TransactionRequest(hash) => {
                e.insert(ENTRY_VALUE, Entry::Bytes(hash.as_bytes().to_vec()))
            }
            EntryPayload::Block(block) => e.insert(ENTRY_VALUE, block.get_entry()),
            EntryPayload::Transaction(tx) => e.insert(ENTRY_VALUE, tx.get_entry()),
            EntryPayload::VoteRequest(chain_id) | EntryPayload::HeadBlockRequest(chain_id) => {
                e.insert(ENTRY_CHAIN_ID, Entry::Bytes(chain_id.clone()))
            }
            EntryPayload::Vote { chain_id, vote } => {
                e.insert(ENTRY_CHAIN_ID, Entry::Bytes(chain_id.clone()));
                e.insert(ENTRY_VALUE, vote.get_entry());
            }
        }
        e
    }
}

/// Outer envelope grouping entries of one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEntries {
    Communication(Vec<Entry>),
    Blockchain(Vec<Entry>),
}

impl ProtocolEntries {
    pub const COMMUNICATION: i64 = 0;
    pub const BLOCKCHAIN: i64 = 1;

    pub fn protocol_id(&self) -> i64 {
        match self {
            ProtocolEntries::Communication(_) => Self::COMMUNICATION,
            ProtocolEntries::Blockchain(_) => Self::BLOCKCHAIN,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        match self {
            ProtocolEntries::Communication(entries) | ProtocolEntries::Blockchain(entries) => entries,
        }
    }

    pub fn push(&mut self, e: Entry) {
        match self {
            ProtocolEntries::Communication(entries) | ProtocolEntries::Blockchain(entries) => {
                entries.push(e)
            }
        }
    }

    /// Decode every inner entry, failing on the first unknown payload.
    pub fn payloads(&self) -> Result<Vec<EntryPayload>, WireError> {
        self.entries().iter().map(EntryPayload::from_entry).collect()
    }

    pub fn from_entry(e: &Entry) -> Result<Self, WireError> {
        let pid = e
            .int_at(PROTOCOL_TYPE)
            .ok_or(WireError::MissingField(PROTOCOL_TYPE))?;
        let entries = e
            .find_key(PROTOCOL_PAYLOAD)
            .and_then(Entry::as_list)
            .unwrap_or_default()
            .to_vec();
        match pid {
            Self::COMMUNICATION => Ok(ProtocolEntries::Communication(entries)),
            Self::BLOCKCHAIN => Ok(ProtocolEntries::Blockchain(entries)),
            other => Err(WireError::UnknownProtocol(other)),
        }
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, WireError> {
        Self::from_entry(&Entry::decode(encode)?)
    }
}

impl Encodable for ProtocolEntries {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert(PROTOCOL_TYPE, Entry::Int(self.protocol_id()));
        e.insert(PROTOCOL_PAYLOAD, Entry::List(self.entries().to_vec()));
        e
    }
}

/// An entry queued for sending to, or received from, a peer.
///
/// Tasks order by timestamp, then data type, then peer, then encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTask {
    pub data_type_id: i64,
    pub peer: PublicKey,
    pub entry: Entry,
    pub timestamp: i64,
}

impl EntryTask {
    pub fn new(data_type_id: i64, peer: PublicKey, entry: Entry, timestamp: i64) -> Self {
        Self {
            data_type_id,
            peer,
            entry,
            timestamp,
        }
    }

    pub fn from_payload(peer: PublicKey, payload: &EntryPayload, timestamp: i64) -> Self {
        Self::new(payload.data_type_id(), peer, payload.get_entry(), timestamp)
    }
}

impl Ord for EntryTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.data_type_id.cmp(&other.data_type_id))
            .then_with(|| self.peer.cmp(&other.peer))
            .then_with(|| self.entry.encode().cmp(&other.entry.encode()))
    }
}

impl PartialOrd for EntryTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
