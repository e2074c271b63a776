//! 20-byte account addresses.

use crate::hash::{keccak256, Hash, HexError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account address, the rightmost 20 bytes of a keccak digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address. Used as the block coinbase; fees credited here are
    /// effectively parked.
    pub const ZERO: Address = Address([0u8; 20]);

    pub const LEN: usize = 20;

    pub fn new(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, HexError> {
        if bytes.len() != 20 {
            return Err(HexError::InvalidLength {
                expected: 20,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes);
        Ok(Address(out))
    }

    /// Rightmost 20 bytes of a 32-byte digest.
    pub fn from_hash(hash: &Hash) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash.as_bytes()[12..]);
        Address(out)
    }

    /// Address of a validator identity: keccak of its 32-byte public key.
    pub fn from_validator_pub_key(pub_key: &[u8; 32]) -> Self {
        Self::from_hash(&keccak256(pub_key))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| HexError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(de::Error::custom)
    }
}
