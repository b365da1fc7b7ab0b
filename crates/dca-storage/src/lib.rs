//! Storage for the DCA keeper.
//!
//! Storage is layered. Backends implement [`StorageInterface`], a plain
//! byte-level key-value contract. [`StorageService`] adds JSON serialization
//! and `namespace:id` keys on top of any backend, and [`OrderStore`] exposes
//! the order-level operations the keeper and the ingestion service use.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod order_store;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use order_store::{FillApplied, OrderStore};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level interface every storage backend implements.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, replacing any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value for `key`. Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all keys starting with `prefix`, in no particular order.
	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Typed storage over a byte-level backend.
///
/// Values are JSON encoded and stored under `namespace:id`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps a missing key to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Loads every value in `namespace` whose id starts with `id_prefix`,
	/// ordered by id.
	pub async fn list<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = Self::key(namespace, id_prefix);
		let mut keys = self.backend.keys_with_prefix(&prefix).await?;
		keys.sort();

		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			let bytes = match self.backend.get_bytes(&key).await {
				Ok(bytes) => bytes,
				// Removed between listing and reading.
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};
			let value =
				serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
			let id = key
				.strip_prefix(namespace)
				.and_then(|k| k.strip_prefix(':'))
				.unwrap_or(&key)
				.to_string();
			values.push((id, value));
		}

		Ok(values)
	}
}

#[cfg(test)]
mod tests {
	use super::implementations::memory::MemoryStorage;
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Cursor {
		block: u64,
	}

	#[tokio::test]
	async fn test_typed_round_trip_and_missing() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		service.store("cursors", "created", &Cursor { block: 7 }).await.unwrap();

		let cursor: Cursor = service.retrieve("cursors", "created").await.unwrap();
		assert_eq!(cursor.block, 7);

		let missing: Option<Cursor> = service.retrieve_optional("cursors", "closed").await.unwrap();
		assert!(missing.is_none());
		assert!(matches!(
			service.retrieve::<Cursor>("cursors", "closed").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_list_is_scoped_and_sorted() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		service.store("cursors", "b", &Cursor { block: 2 }).await.unwrap();
		service.store("cursors", "a", &Cursor { block: 1 }).await.unwrap();
		service.store("cursors_old", "c", &Cursor { block: 3 }).await.unwrap();

		let listed: Vec<(String, Cursor)> = service.list("cursors", "").await.unwrap();
		let ids: Vec<&str> = listed.iter().map(|(id, _)| id.as_str()).collect();
		assert_eq!(ids, vec!["a", "b"]);
	}
}
