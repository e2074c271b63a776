//! Key material: secp256k1 account keys and ed25519 validator keys.
//!
//! Account transactions are signed with secp256k1 and verified by public-key
//! recovery, so the signer never travels on the wire beyond the claimed
//! `from` address. Validator identities are 32-byte ed25519 public keys, the
//! format the consensus engine expects in voting-power updates.

use crate::address::Address;
use crate::hash::{keccak256, Hash, HexError};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Errors from signing and recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signature recovery failed: {0}")]
    RecoveryFailed(String),
}

/// A secp256k1 signing key for an externally-owned account.
#[derive(Clone)]
pub struct AccountKey {
    signing: SigningKey,
}

impl AccountKey {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing =
            SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing })
    }

    /// The address controlled by this key: the rightmost 20 bytes of the
    /// keccak digest of the uncompressed public key.
    pub fn address(&self) -> Address {
        let verifying = VerifyingKey::from(&self.signing);
        address_of(&verifying)
    }

    /// Sign a 32-byte digest, producing a 65-byte `r ‖ s ‖ v` signature where
    /// `v` is the raw recovery id.
    pub fn sign_hash(&self, hash: &Hash) -> Vec<u8> {
        let (signature, recovery_id) = self
            .signing
            .sign_prehash_recoverable(hash.as_bytes())
            .expect("signing a 32-byte prehash cannot fail");
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(recovery_id.to_byte());
        out
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

fn address_of(verifying: &VerifyingKey) -> Address {
    let point = verifying.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    Address::from_hash(&keccak256(&point.as_bytes()[1..]))
}

/// Recover the signer address of a 65-byte signature over `hash`.
pub fn recover_signer(hash: &Hash, signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != 65 {
        return Err(CryptoError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(signature[64]).ok_or_else(|| {
        CryptoError::InvalidSignature(format!("bad recovery id {}", signature[64]))
    })?;
    let verifying = VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recovery_id)
        .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
    Ok(address_of(&verifying))
}

/// A 32-byte ed25519 validator public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| HexError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(HexError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(PublicKey(out))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(de::Error::custom)
    }
}

/// An ed25519 validator keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing: ed25519_dalek::SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// The address this validator identity is known by on-chain.
    pub fn address(&self) -> Address {
        Address::from_validator_pub_key(self.public_key().as_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover() {
        let key = AccountKey::generate();
        let digest = keccak256(b"payload");
        let signature = key.sign_hash(&digest);
        assert_eq!(signature.len(), 65);
        assert_eq!(recover_signer(&digest, &signature).unwrap(), key.address());
    }

    #[test]
    fn recovery_of_tampered_signature_misidentifies_or_fails() {
        let key = AccountKey::generate();
        let digest = keccak256(b"payload");
        let mut signature = key.sign_hash(&digest);
        signature[10] ^= 0xff;
        match recover_signer(&digest, &signature) {
            Ok(addr) => assert_ne!(addr, key.address()),
            Err(_) => {}
        }
    }

    #[test]
    fn rejects_short_signature() {
        let digest = keccak256(b"x");
        assert!(matches!(
            recover_signer(&digest, &[0u8; 64]),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn keypair_from_seed_is_deterministic() {
        let a = KeyPair::from_seed([7u8; 32]);
        let b = KeyPair::from_seed([7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
    }
}
