use std::fmt;

use sha2::{Digest, Sha256};

use crate::codec::fixed_bytes;

/// SHA-256 digest identifying blocks, transactions and messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    /// All-zero hash: parent of a genesis block and the "no earlier change"
    /// marker in state linkers.
    pub const GENESIS_SENTINEL: Sha256Hash = Sha256Hash([0u8; 32]);

    pub fn digest(data: &[u8]) -> Self {
        Sha256Hash(Sha256::digest(data).into())
    }

    /// Decodes a hash from raw bytes; the wrong length yields the zero hash.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Sha256Hash(fixed_bytes(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(s).map_err(|_| "invalid hash hex")?;
        if bytes.len() != 32 {
            return Err("invalid hash length");
        }
        Ok(Self::from_slice(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_all_zeros(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
