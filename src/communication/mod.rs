use std::fmt;

use crate::blockchain::Sha256Hash;
use crate::codec::{CodecError, Encodable, Entry};
use crate::wallet::PublicKey;

/// A peer-to-peer chat message, identified by the hash of its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    timestamp: i64,
    sender: PublicKey,
    receiver: PublicKey,
    payload: Vec<u8>,
    hash: Sha256Hash,
}

impl Message {
    pub fn new(timestamp: i64, sender: PublicKey, receiver: PublicKey, payload: Vec<u8>) -> Self {
        let mut msg = Self {
            timestamp,
            sender,
            receiver,
            payload,
            hash: Sha256Hash::default(),
        };
        msg.hash = Sha256Hash::digest(&msg.get_encode());
        msg
    }

    pub fn from_entry(e: &Entry) -> Self {
        let mut msg = Self {
            timestamp: e.int_at("t").unwrap_or_default(),
            sender: e.bytes_at("s").map(PublicKey::from_slice).unwrap_or_default(),
            receiver: e.bytes_at("r").map(PublicKey::from_slice).unwrap_or_default(),
            payload: e.bytes_at("p").map(<[u8]>::to_vec).unwrap_or_default(),
            hash: Sha256Hash::default(),
        };
        msg.hash = Sha256Hash::digest(&msg.get_encode());
        msg
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
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

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sha256(&self) -> &Sha256Hash {
        &self.hash
    }
}

impl Encodable for Message {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("t", Entry::Int(self.timestamp));
        e.insert("s", Entry::Bytes(self.sender.as_bytes().to_vec()));
        e.insert("r", Entry::Bytes(self.receiver.as_bytes().to_vec()));
        e.insert("p", Entry::Bytes(self.payload.clone()));
        e
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message hash: {} timestamp: {} sender: {} receiver: {} payload: {}",
            self.hash,
            self.timestamp,
            self.sender,
            self.receiver,
            hex::encode(&self.payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_decoding() {
        let msg = Message::new(1_650_000_000, PublicKey([1u8; 32]), PublicKey([2u8; 32]), b"hi".to_vec());
        let back = Message::from_encode(&msg.get_encode()).unwrap();
        assert_eq!(back, msg);
        assert_eq!(msg.get_entry().int_at("t"), Some(1_650_000_000));
    }
}
