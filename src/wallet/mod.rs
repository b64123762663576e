use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::codec::fixed_bytes;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 public key. Also the account identifier within a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

/// Ed25519 secret seed.
#[derive(Clone)]
pub struct SecretKey(pub [u8; SECRET_KEY_LEN]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Default for Signature {
    fn default() -> Self {
        Signature([0u8; SIGNATURE_LEN])
    }
}

impl PublicKey {
    /// Decodes a key from raw bytes; the wrong length yields the zero key.
    pub fn from_slice(bytes: &[u8]) -> Self {
        PublicKey(fixed_bytes(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(s).map_err(|_| "invalid pubkey hex")?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err("invalid pubkey length");
        }
        Ok(Self::from_slice(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PUBLIC_KEY_LEN]
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Signature {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Signature(fixed_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Generate a new Ed25519 keypair.
pub fn generate_keypair() -> (PublicKey, SecretKey) {
    let signing = SigningKey::generate(&mut OsRng);
    (
        PublicKey(signing.verifying_key().to_bytes()),
        SecretKey(signing.to_bytes()),
    )
}

/// Keypair derived deterministically from a 32-byte seed.
pub fn keypair_from_seed(seed: [u8; SECRET_KEY_LEN]) -> (PublicKey, SecretKey) {
    let signing = SigningKey::from_bytes(&seed);
    (PublicKey(signing.verifying_key().to_bytes()), SecretKey(seed))
}

/// Hex keypair for display: (secret_hex, public_hex).
pub fn generate_keypair_hex() -> (String, String) {
    let (pk, sk) = generate_keypair();
    (hex::encode(sk.0), pk.to_string())
}

/// Sign `message`. Ed25519 signing is deterministic, so the same key and
/// message always produce the same signature.
pub fn ed25519_sign(message: &[u8], sk: &SecretKey) -> Signature {
    let signing = SigningKey::from_bytes(&sk.0);
    Signature(signing.sign(message).to_bytes())
}

/// Verify `signature` over `message` against `pk`. Malformed keys verify as
/// false.
pub fn ed25519_verify(signature: &Signature, message: &[u8], pk: &PublicKey) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&pk.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let (pk, sk) = generate_keypair();
        let sig = ed25519_sign(b"payload", &sk);
        assert!(ed25519_verify(&sig, b"payload", &pk));
        assert!(!ed25519_verify(&sig, b"payloaD", &pk));
    }

    #[test]
    fn signatures_are_deterministic() {
        let (pk, sk) = keypair_from_seed([7u8; 32]);
        assert_eq!(ed25519_sign(b"m", &sk), ed25519_sign(b"m", &sk));
        assert!(ed25519_verify(&ed25519_sign(b"m", &sk), b"m", &pk));
    }

    #[test]
    fn zero_key_never_verifies() {
        let (_, sk) = generate_keypair();
        let sig = ed25519_sign(b"m", &sk);
        assert!(!ed25519_verify(&sig, b"m", &PublicKey::default()));
    }

    #[test]
    fn hex_round_trip() {
        let (_, pk_hex) = generate_keypair_hex();
        let pk = PublicKey::from_hex(&pk_hex).unwrap();
        assert_eq!(pk.to_string(), pk_hex);
        assert!(PublicKey::from_hex("abcd").is_err());
    }
}
