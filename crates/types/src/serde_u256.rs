//! Serde adapter encoding `U256` as a decimal string.
//!
//! The persisted layout and the query surface both carry 256-bit amounts as
//! decimal strings, so `#[serde(with = "ember_types::serde_u256")]` is used
//! on every `U256` field instead of the hex encoding the `primitive-types`
//! serde feature would produce.

use primitive_types::U256;
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let s = String::deserialize(deserializer)?;
    U256::from_dec_str(&s).map_err(|e| de::Error::custom(format!("invalid decimal u256: {e}")))
}
