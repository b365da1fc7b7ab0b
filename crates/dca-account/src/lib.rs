//! Signing key material for the keeper.
//!
//! The keeper signs every execute and close transaction with one account.
//! Providers implement [`AccountInterface`]; the rest of the workspace only
//! sees [`AccountService`].

use async_trait::async_trait;
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// `0x`-prefixed hex address of the account.
	async fn address(&self) -> Result<String, AccountError>;

	/// Signs BCS transaction bytes and returns the serialized signature,
	/// base64 encoded, ready to submit alongside the transaction.
	async fn sign_transaction(&self, tx_bytes: &[u8]) -> Result<String, AccountError>;
}

pub struct AccountService {
	provider: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(provider: Box<dyn AccountInterface>) -> Self {
		Self { provider }
	}

	pub async fn get_address(&self) -> Result<String, AccountError> {
		self.provider.address().await
	}

	pub async fn sign(&self, tx_bytes: &[u8]) -> Result<String, AccountError> {
		self.provider.sign_transaction(tx_bytes).await
	}
}
