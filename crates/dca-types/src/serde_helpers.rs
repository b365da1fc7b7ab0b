//! Serde helpers for on-chain amounts.
//!
//! Move `u64` values arrive as decimal strings in event JSON, while some
//! indexers hand them back as plain numbers. Both decode to the exact integer.

use serde::{de, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
	String(String),
	Number(u64),
}

/// Deserializes a `u64` from either a decimal string or a JSON number.
pub fn deserialize_u64_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
	D: Deserializer<'de>,
{
	match StringOrNumber::deserialize(deserializer)? {
		StringOrNumber::Number(n) => Ok(n),
		StringOrNumber::String(s) => s
			.trim()
			.parse::<u64>()
			.map_err(|_| de::Error::custom(format!("Invalid u64 amount: {}", s))),
	}
}

/// Deserializes a `u32` counter from either a decimal string or a JSON number.
pub fn deserialize_u32_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
	D: Deserializer<'de>,
{
	let value = deserialize_u64_string(deserializer)?;
	u32::try_from(value).map_err(|_| de::Error::custom(format!("Counter out of range: {}", value)))
}

/// Serializes a `u64` as a decimal string, matching the on-chain JSON shape.
pub fn serialize_u64_string<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&value.to_string())
}
