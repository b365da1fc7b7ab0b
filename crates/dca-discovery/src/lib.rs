//! Event ingestion for the DCA keeper.
//!
//! Orders are placed, executed and closed on chain by parties other than the
//! keeper too. An [`EventSourceInterface`] reports those events from an
//! indexer and [`IngestionService`] folds them into the order store, keeping
//! one block cursor per event kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dca_storage::StorageError;
use dca_types::{OrderClosedEvent, OrderCreatedEvent, OrderExecutedEvent};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod ingestion;

pub mod implementations {
	pub mod sentio;
}

pub use ingestion::{IngestionService, KindReport, SyncReport};

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Unexpected response: {0}")]
	Response(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// One indexed occurrence of a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedEvent<T> {
	#[serde(flatten)]
	pub event: T,
	/// Digest of the emitting transaction.
	#[serde(rename = "transaction_hash")]
	pub digest: String,
	/// Checkpoint the transaction was included in.
	pub block_number: u64,
	#[serde(deserialize_with = "deserialize_timestamp")]
	pub timestamp: DateTime<Utc>,
}

/// Indexers report event time either as epoch milliseconds or as an
/// RFC 3339 string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Millis(i64),
		Text(String),
	}

	match Raw::deserialize(deserializer)? {
		Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
			.ok_or_else(|| de::Error::custom(format!("Timestamp out of range: {}", ms))),
		Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
			.map(|t| t.with_timezone(&Utc))
			.or_else(|_| {
				text.parse::<i64>()
					.ok()
					.and_then(DateTime::from_timestamp_millis)
					.ok_or_else(|| de::Error::custom(format!("Invalid timestamp: {}", text)))
			}),
	}
}

/// A source of indexed DCA events.
///
/// Every call returns the events strictly after `after_block`, in any order.
#[async_trait]
pub trait EventSourceInterface: Send + Sync {
	async fn fetch_created(
		&self,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<OrderCreatedEvent>>, DiscoveryError>;

	async fn fetch_executed(
		&self,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<OrderExecutedEvent>>, DiscoveryError>;

	async fn fetch_closed(
		&self,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<OrderClosedEvent>>, DiscoveryError>;
}
