//! Local ed25519 wallet.
//!
//! Keys are held in process memory. A transaction is signed over
//! `blake2b256(intent || tx_bytes)` where the intent prefix marks a
//! transaction-data message, and the signature is serialized in the chain's
//! `flag || signature || public key` layout.

use crate::{AccountError, AccountInterface};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use dca_types::{ConfigSchema, Field, FieldType, Schema};
use ed25519_dalek::{Signer, SigningKey};

type Blake2b256 = Blake2b<U32>;

/// Scheme flag for ed25519 keys.
const ED25519_FLAG: u8 = 0x00;

/// Intent prefix: transaction data, version 0, app id 0.
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

pub struct LocalWallet {
	signing_key: SigningKey,
}

impl LocalWallet {
	/// Creates a wallet from a hex-encoded 32 byte ed25519 secret key
	/// (with or without `0x`).
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let key = private_key_hex.trim();
		let key = key.strip_prefix("0x").unwrap_or(key);
		let bytes = hex::decode(key)
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;
		let secret: [u8; 32] = bytes
			.try_into()
			.map_err(|_| AccountError::InvalidKey("Private key must be 32 bytes".to_string()))?;

		Ok(Self {
			signing_key: SigningKey::from_bytes(&secret),
		})
	}

	fn public_key(&self) -> [u8; 32] {
		self.signing_key.verifying_key().to_bytes()
	}

	fn address_bytes(&self) -> [u8; 32] {
		let mut hasher = Blake2b256::new();
		hasher.update([ED25519_FLAG]);
		hasher.update(self.public_key());
		finalize(hasher)
	}

	/// Message digest actually signed for `tx_bytes`.
	pub fn transaction_digest(tx_bytes: &[u8]) -> [u8; 32] {
		let mut hasher = Blake2b256::new();
		hasher.update(TRANSACTION_INTENT);
		hasher.update(tx_bytes);
		finalize(hasher)
	}
}

fn finalize(hasher: Blake2b256) -> [u8; 32] {
	let mut out = [0u8; 32];
	out.copy_from_slice(&hasher.finalize());
	out
}

pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), dca_types::ValidationError> {
		let schema = Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|value| {
				let key = value.as_str().unwrap_or_default();
				let key = key.strip_prefix("0x").unwrap_or(key);

				if key.len() != 64 {
					return Err("Private key must be 64 hex characters (32 bytes)".to_string());
				}
				if hex::decode(key).is_err() {
					return Err("Private key must be valid hexadecimal".to_string());
				}
				Ok(())
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	async fn address(&self) -> Result<String, AccountError> {
		Ok(format!("0x{}", hex::encode(self.address_bytes())))
	}

	async fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, AccountError> {
		if tx_bytes.is_empty() {
			return Err(AccountError::SigningFailed(
				"Refusing to sign empty transaction".to_string(),
			));
		}

		let digest = Self::transaction_digest(tx_bytes);
		let signature = self.signing_key.sign(&digest);

		let mut serialized = Vec::with_capacity(1 + 64 + 32);
		serialized.push(ED25519_FLAG);
		serialized.extend_from_slice(&signature.to_bytes());
		serialized.extend_from_slice(&self.public_key());

		Ok(STANDARD.encode(serialized))
	}
}

/// Creates a local wallet from `[account.config]`.
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::Configuration(e.to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::Configuration("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(private_key)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use ed25519_dalek::{Signature, Verifier, VerifyingKey};

	const KEY: &str = "0x4ec5a9eefc0bb86027a6f3ba718793c813505acc25ed09447caf6a069accdd4b";

	#[tokio::test]
	async fn test_address_shape_is_stable() {
		let wallet = LocalWallet::new(KEY).unwrap();
		let address = wallet.address().await.unwrap();
		assert!(address.starts_with("0x"));
		assert_eq!(address.len(), 66);

		let again = LocalWallet::new(KEY.trim_start_matches("0x")).unwrap();
		assert_eq!(again.address().await.unwrap(), address);
	}

	#[tokio::test]
	async fn test_signature_layout_verifies() {
		let wallet = LocalWallet::new(KEY).unwrap();
		let tx_bytes = b"transaction-bytes";

		let encoded = wallet.sign_transaction(tx_bytes).await.unwrap();
		let raw = STANDARD.decode(encoded).unwrap();
		assert_eq!(raw.len(), 97);
		assert_eq!(raw[0], ED25519_FLAG);

		let public: [u8; 32] = raw[65..].try_into().unwrap();
		assert_eq!(public, wallet.public_key());

		let signature = Signature::from_slice(&raw[1..65]).unwrap();
		let verifying = VerifyingKey::from_bytes(&public).unwrap();
		let digest = LocalWallet::transaction_digest(tx_bytes);
		assert!(verifying.verify(&digest, &signature).is_ok());
	}

	#[test]
	fn test_rejects_bad_keys() {
		assert!(matches!(LocalWallet::new("0x1234"), Err(AccountError::InvalidKey(_))));
		assert!(matches!(LocalWallet::new("zz"), Err(AccountError::InvalidKey(_))));

		let config: toml::Value = toml::from_str(r#"private_key = "0xabc""#).unwrap();
		assert!(matches!(create_account(&config), Err(AccountError::Configuration(_))));

		let empty = toml::Value::Table(toml::map::Map::new());
		assert!(create_account(&empty).is_err());
	}
}
