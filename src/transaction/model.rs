use std::fmt;

use log::warn;

use crate::blockchain::Sha256Hash;
use crate::codec::{
    CodecError, Encodable, Entry, le_i32, le_i64, read_le_i32, read_le_i64,
};
use crate::wallet::{PublicKey, SecretKey, Signature, ed25519_sign, ed25519_verify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVersion {
    V1,
    Unknown(i32),
}

impl TxVersion {
    pub fn id(self) -> i32 {
        match self {
            TxVersion::V1 => 0,
            TxVersion::Unknown(v) => v,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            0 => TxVersion::V1,
            v => TxVersion::Unknown(v),
        }
    }
}

/// The type tag decides which fields take part in the canonical encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    /// Mining-only transaction carrying a note payload; moves no value.
    Note,
    Transfer,
    Unknown(i32),
}

impl TxType {
    pub fn id(self) -> i32 {
        match self {
            TxType::Note => 0,
            TxType::Transfer => 1,
            TxType::Unknown(v) => v,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            0 => TxType::Note,
            1 => TxType::Transfer,
            v => TxType::Unknown(v),
        }
    }
}

/// A signed value transfer or mining note.
///
/// The hash commits to the signed encoding, so it only exists once the
/// transaction has been signed (or decoded from a signed encoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    chain_id: Vec<u8>,
    version: TxVersion,
    tx_type: TxType,
    timestamp: i64,
    sender: PublicKey,
    receiver: PublicKey,
    nonce: i64,
    fee: i64,
    amount: i64,
    payload: Vec<u8>,
    signature: Signature,
    hash: Option<Sha256Hash>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            chain_id: Vec::new(),
            version: TxVersion::V1,
            tx_type: TxType::Note,
            timestamp: 0,
            sender: PublicKey::default(),
            receiver: PublicKey::default(),
            nonce: 0,
            fee: 0,
            amount: 0,
            payload: Vec::new(),
            signature: Signature::default(),
            hash: None,
        }
    }
}

impl Transaction {
    /// Build an unsigned transfer. Call `sign()` before embedding it.
    #[allow(clippy::too_many_arguments)]
    pub fn new_transfer(
        chain_id: Vec<u8>,
        timestamp: i64,
        sender: PublicKey,
        receiver: PublicKey,
        nonce: i64,
        fee: i64,
        amount: i64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            chain_id,
            tx_type: TxType::Transfer,
            timestamp,
            sender,
            receiver,
            nonce,
            fee,
            amount,
            payload,
            ..Self::default()
        }
    }

    /// Build an unsigned mining-only note.
    pub fn new_note(chain_id: Vec<u8>, timestamp: i64, sender: PublicKey, payload: Vec<u8>) -> Self {
        Self {
            chain_id,
            tx_type: TxType::Note,
            timestamp,
            sender,
            payload,
            ..Self::default()
        }
    }

    /// Populate from a signed entry and hash its canonical re-encoding.
    pub fn from_entry(e: &Entry) -> Self {
        let int = |key: &str| e.bytes_at(key).map(read_le_i64).unwrap_or_default();
        let key = |k: &str| e.bytes_at(k).map(PublicKey::from_slice).unwrap_or_default();
        let mut tx = Self {
            chain_id: e.bytes_at("i").map(<[u8]>::to_vec).unwrap_or_default(),
            version: TxVersion::from_id(e.bytes_at("v").map(read_le_i32).unwrap_or_default()),
            tx_type: TxType::from_id(e.bytes_at("e").map(read_le_i32).unwrap_or_default()),
            timestamp: int("t"),
            sender: key("s"),
            receiver: key("r"),
            nonce: int("n"),
            fee: int("f"),
            amount: int("a"),
            payload: e.bytes_at("p").map(<[u8]>::to_vec).unwrap_or_default(),
            signature: e.bytes_at("sig").map(Signature::from_slice).unwrap_or_default(),
            hash: None,
        };
        tx.hash = Some(Sha256Hash::digest(&tx.get_encode()));
        tx
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    pub fn chain_id(&self) -> &[u8] {
        &self.chain_id
    }

    pub fn version(&self) -> TxVersion {
        self.version
    }

    pub fn tx_type(&self) -> TxType {
        self.tx_type
    }

    pub fn is_transfer(&self) -> bool {
        self.tx_type == TxType::Transfer
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sender(&self) -> &PublicKey {
        &self.sender
    }

    pub fn receiver(&self) -> &PublicKey {
        &self.receiver
    }

    pub fn nonce(&self) -> i64 {
        self.nonce
    }

    pub fn fee(&self) -> i64 {
        self.fee
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Content hash of the signed encoding; `None` until signed.
    pub fn sha256(&self) -> Option<&Sha256Hash> {
        self.hash.as_ref()
    }

    pub fn get_entry_without_signature(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("i", Entry::Bytes(self.chain_id.clone()));
        e.insert("v", le_i32(self.version.id()));
        e.insert("e", le_i32(self.tx_type.id()));
        e.insert("t", le_i64(self.timestamp));
        e.insert("s", Entry::Bytes(self.sender.as_bytes().to_vec()));
        if self.is_transfer() {
            e.insert("r", Entry::Bytes(self.receiver.as_bytes().to_vec()));
            e.insert("n", le_i64(self.nonce));
            e.insert("f", le_i64(self.fee));
            e.insert("a", le_i64(self.amount));
        }
        e.insert("p", Entry::Bytes(self.payload.clone()));
        e
    }

    pub fn get_encode_without_signature(&self) -> Vec<u8> {
        self.get_entry_without_signature().encode()
    }

    pub fn get_encode_size(&self) -> usize {
        self.get_encode().len()
    }

    /// Sign the unsigned encoding, then hash the signed encoding.
    pub fn sign(&mut self, pk: &PublicKey, sk: &SecretKey) {
        if *pk != self.sender {
            warn!("signing tx with key {} that is not its sender {}", pk, self.sender);
        }
        self.signature = ed25519_sign(&self.get_encode_without_signature(), sk);
        self.hash = Some(Sha256Hash::digest(&self.get_encode()));
    }

    pub fn verify_signature(&self) -> bool {
        ed25519_verify(&self.signature, &self.get_encode_without_signature(), &self.sender)
    }
}

impl Encodable for Transaction {
    fn get_entry(&self) -> Entry {
        let mut e = self.get_entry_without_signature();
        e.insert("sig", Entry::Bytes(self.signature.as_bytes().to_vec()));
        e
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx chain_id: {} type: {:?} timestamp: {} sender: {} receiver: {} nonce: {} amount: {} fee: {} hash: {}",
            hex::encode(&self.chain_id),
            self.tx_type,
            self.timestamp,
            self.sender,
            self.receiver,
            self.nonce,
            self.amount,
            self.fee,
            self.hash.map(|h| h.to_string()).unwrap_or_default(),
        )
    }
}
