//! Assembles a keeper from configuration and registered implementations.

use crate::engine::{KeeperEngine, KeeperSettings};
use crate::error::KeeperError;
use dca_account::{AccountError, AccountInterface, AccountService};
use dca_config::Config;
use dca_delivery::{DeliveryError, DeliveryService, ExecutorInterface};
use dca_discovery::{DiscoveryError, EventSourceInterface, IngestionService};
use dca_storage::{OrderStore, StorageError, StorageInterface, StorageService};
use dca_types::AssetRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// Type aliases for factory functions
type StorageFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> + Send>;
type AccountFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send>;
type ExecutorFactory = Box<
	dyn Fn(
			&toml::Value,
			Arc<AccountService>,
			AssetRegistry,
		) -> Result<Box<dyn ExecutorInterface>, DeliveryError>
		+ Send,
>;
type SourceFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn EventSourceInterface>, DiscoveryError> + Send>;

/// A fully wired keeper.
pub struct Keeper {
	pub engine: KeeperEngine,
	/// Present when discovery is enabled.
	pub ingestion: Option<IngestionService>,
}

pub struct KeeperBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	account_factories: HashMap<String, AccountFactory>,
	executor_factories: HashMap<String, ExecutorFactory>,
	source_factories: HashMap<String, SourceFactory>,
}

impl KeeperBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			account_factories: HashMap::new(),
			executor_factories: HashMap::new(),
			source_factories: HashMap::new(),
		}
	}

	pub fn with_storage_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> + Send + 'static,
	{
		self.storage_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_account_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send + 'static,
	{
		self.account_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_executor_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(
				&toml::Value,
				Arc<AccountService>,
				AssetRegistry,
			) -> Result<Box<dyn ExecutorInterface>, DeliveryError>
			+ Send
			+ 'static,
	{
		self.executor_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_source_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn EventSourceInterface>, DiscoveryError> + Send + 'static,
	{
		self.source_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	fn build_store(&self) -> Result<Arc<OrderStore>, KeeperError> {
		let backend = &self.config.storage.backend;
		let factory = self
			.storage_factories
			.get(backend)
			.ok_or_else(|| unknown("storage", backend))?;
		let storage = Arc::new(StorageService::new(factory(&self.config.storage.config)?));
		Ok(Arc::new(OrderStore::new(storage)))
	}

	fn build_ingestion(&self, store: Arc<OrderStore>) -> Result<IngestionService, KeeperError> {
		let discovery = &self.config.discovery;
		let mut ingestion =
			IngestionService::new(store, Duration::from_secs(discovery.poll_interval_secs));

		let mut names: Vec<&String> = discovery.sources.keys().collect();
		names.sort();
		for name in names {
			let factory = self
				.source_factories
				.get(name)
				.ok_or_else(|| unknown("event source", name))?;
			ingestion = ingestion.with_source(name.as_str(), factory(&discovery.sources[name])?);
		}

		if ingestion.source_count() == 0 {
			return Err(KeeperError::Configuration(
				"Discovery is enabled but no sources are configured".into(),
			));
		}
		Ok(ingestion)
	}

	pub fn build(self) -> Result<Keeper, KeeperError> {
		let store = self.build_store()?;

		let account_backend = &self.config.account.backend;
		let account_factory = self
			.account_factories
			.get(account_backend)
			.ok_or_else(|| unknown("account", account_backend))?;
		let account = Arc::new(AccountService::new(account_factory(
			&self.config.account.config,
		)?));

		let assets = AssetRegistry::from_overrides(&self.config.assets)
			.map_err(|e| KeeperError::Configuration(format!("Invalid asset override: {}", e)))?;

		let executor_backend = &self.config.executor.backend;
		let executor_factory = self
			.executor_factories
			.get(executor_backend)
			.ok_or_else(|| unknown("executor", executor_backend))?;
		let executor = executor_factory(&self.config.executor.config, account, assets)?;
		let delivery = Arc::new(DeliveryService::new(executor, self.config.executor.timeout()));

		let ingestion = if self.config.discovery.enabled {
			Some(self.build_ingestion(store.clone())?)
		} else {
			None
		};

		let settings = KeeperSettings::from(&self.config.keeper);
		info!(
			name = %self.config.keeper.name,
			storage = %self.config.storage.backend,
			executor = %executor_backend,
			discovery = ingestion.is_some(),
			"Keeper assembled"
		);

		Ok(Keeper {
			engine: KeeperEngine::new(store, delivery, settings),
			ingestion,
		})
	}
}

fn unknown(kind: &str, name: &str) -> KeeperError {
	KeeperError::Configuration(format!("Unknown {} implementation: {}", kind, name))
}
