//! Configuration types for the keeper.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root of `keeper.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub keeper: KeeperConfig,
	pub storage: StorageConfig,
	#[serde(default)]
	pub account: AccountConfig,
	pub executor: ExecutorConfig,
	#[serde(default)]
	pub discovery: DiscoveryConfig,
	/// Symbol to coin type overrides, e.g. `USDC = "0x..::usdc::USDC"`.
	#[serde(default)]
	pub assets: HashMap<String, String>,
}

/// Scheduling and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
	#[serde(default = "default_name")]
	pub name: String,
	/// Seconds between ticks.
	#[serde(default = "default_tick_interval_secs")]
	pub tick_interval_secs: u64,
	/// Executor calls in flight at once.
	#[serde(default = "default_concurrency")]
	pub concurrency: usize,
	/// Orders dispatched per chunk.
	#[serde(default = "default_chunk_size")]
	pub chunk_size: usize,
	/// Consecutive failures before an order is marked failed.
	#[serde(default = "default_max_retry_count")]
	pub max_retry_count: u32,
	/// Slack added to the close deadline so a late final tranche can still run.
	#[serde(default = "default_grace_period_secs")]
	pub grace_period_secs: u64,
	/// Lock file guarding against a second keeper process.
	#[serde(default)]
	pub lock_file: Option<PathBuf>,
}

impl KeeperConfig {
	pub fn tick_interval(&self) -> Duration {
		Duration::from_secs(self.tick_interval_secs)
	}

	pub fn grace_period(&self) -> Duration {
		Duration::from_secs(self.grace_period_secs)
	}
}

impl Default for KeeperConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			tick_interval_secs: default_tick_interval_secs(),
			concurrency: default_concurrency(),
			chunk_size: default_chunk_size(),
			max_retry_count: default_max_retry_count(),
			grace_period_secs: default_grace_period_secs(),
			lock_file: None,
		}
	}
}

fn default_name() -> String {
	"dca-keeper".to_string()
}

fn default_tick_interval_secs() -> u64 {
	1
}

fn default_concurrency() -> usize {
	5
}

fn default_chunk_size() -> usize {
	10
}

fn default_max_retry_count() -> u32 {
	10
}

fn default_grace_period_secs() -> u64 {
	600
}

fn default_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
	/// `memory` or `file`.
	pub backend: String,
	#[serde(default = "default_table")]
	pub config: toml::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
	#[serde(default = "default_account_backend")]
	pub backend: String,
	#[serde(default = "default_table")]
	pub config: toml::Value,
}

impl Default for AccountConfig {
	fn default() -> Self {
		Self {
			backend: default_account_backend(),
			config: default_table(),
		}
	}
}

fn default_account_backend() -> String {
	"local".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
	pub backend: String,
	/// Upper bound on one execute or close call, including confirmation.
	#[serde(default = "default_timeout_secs")]
	pub timeout_secs: u64,
	#[serde(default = "default_table")]
	pub config: toml::Value,
}

impl ExecutorConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

fn default_timeout_secs() -> u64 {
	120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_poll_interval_secs")]
	pub poll_interval_secs: u64,
	/// Event sources keyed by implementation name.
	#[serde(default)]
	pub sources: HashMap<String, toml::Value>,
}

impl Default for DiscoveryConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			poll_interval_secs: default_poll_interval_secs(),
			sources: HashMap::new(),
		}
	}
}

fn default_poll_interval_secs() -> u64 {
	60
}
