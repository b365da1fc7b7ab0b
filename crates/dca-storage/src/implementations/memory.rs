//! In-memory storage backend.
//!
//! Nothing survives a restart; intended for tests and dry runs.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use dca_types::{ConfigSchema, Schema};

#[derive(Default)]
pub struct MemoryStorage {
	data: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.data
			.get(key)
			.map(|entry| entry.value().clone())
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		self.data.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.data.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.data.contains_key(key))
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		Ok(self
			.data
			.iter()
			.filter(|entry| entry.key().starts_with(prefix))
			.map(|entry| entry.key().clone())
			.collect())
	}
}

/// The memory backend takes no options.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), dca_types::ValidationError> {
		Schema::default().validate(config)
	}
}

pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_memory_storage() {
		let storage = MemoryStorage::new();
		storage.set_bytes("orders:0x1", vec![1, 2, 3]).await.unwrap();
		storage.set_bytes("orders:0x2", vec![4]).await.unwrap();
		storage.set_bytes("fills:0xd", vec![5]).await.unwrap();

		assert_eq!(storage.get_bytes("orders:0x1").await.unwrap(), vec![1, 2, 3]);
		assert!(storage.exists("orders:0x2").await.unwrap());

		let mut keys = storage.keys_with_prefix("orders:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["orders:0x1", "orders:0x2"]);

		storage.delete("orders:0x1").await.unwrap();
		storage.delete("orders:0x1").await.unwrap();
		assert!(matches!(
			storage.get_bytes("orders:0x1").await,
			Err(StorageError::NotFound)
		));
	}
}
