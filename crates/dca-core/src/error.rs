use dca_account::AccountError;
use dca_delivery::DeliveryError;
use dca_discovery::DiscoveryError;
use dca_storage::StorageError;
use dca_types::EscrowId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Account error: {0}")]
	Account(#[from] AccountError),

	#[error("Executor error: {0}")]
	Delivery(#[from] DeliveryError),

	#[error("Discovery error: {0}")]
	Discovery(#[from] DiscoveryError),

	#[error("Order not found: {0}")]
	OrderNotFound(EscrowId),

	#[error("Invalid state for {escrow_id}: {reason}")]
	InvalidState { escrow_id: EscrowId, reason: String },
}
