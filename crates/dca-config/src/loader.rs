use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{Config, ConfigError};

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader {
	file_path: Option<PathBuf>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "DCA_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_path_buf());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	/// Reads the file, applies process environment overrides and validates.
	pub async fn load(&self) -> Result<Config, ConfigError> {
		let file_path = self
			.file_path
			.as_ref()
			.ok_or_else(|| ConfigError::FileNotFound("No configuration file specified".to_string()))?;

		let content = match tokio::fs::read_to_string(file_path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(file_path.display().to_string()));
			}
			Err(e) => return Err(e.into()),
		};

		let lookup = |name: &str| env::var(name).ok();
		let mut config = Self::parse(&content, &lookup)?;
		self.apply_env_overrides(&mut config, &lookup)?;
		Self::validate(&config)?;

		Ok(config)
	}

	/// Parses and validates a TOML document using the process environment
	/// for `${VAR}` references. Prefix overrides are not applied.
	pub fn from_toml(content: &str) -> Result<Config, ConfigError> {
		let config = Self::parse(content, &|name: &str| env::var(name).ok())?;
		Self::validate(&config)?;
		Ok(config)
	}

	fn parse(content: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
		let substituted = substitute_env_vars(content, lookup)?;
		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	/// Applies `<prefix>*` overrides resolved through `lookup`.
	pub fn apply_env_overrides(
		&self,
		config: &mut Config,
		lookup: &dyn Fn(&str) -> Option<String>,
	) -> Result<(), ConfigError> {
		let var = |suffix: &str| {
			let name = format!("{}{}", self.env_prefix, suffix);
			lookup(&name).map(|value| (name, value))
		};

		if let Some((name, url)) = var("RPC_URL") {
			debug!("Overriding executor rpc_url from {}", name);
			set_table_key(&mut config.executor.config, "rpc_url", url);
		}

		if let Some((name, key)) = var("PRIVATE_KEY") {
			debug!("Overriding account private_key from {}", name);
			set_table_key(&mut config.account.config, "private_key", key);
		}

		if let Some((name, value)) = var("CONCURRENCY") {
			config.keeper.concurrency = parse_override(&name, &value)?;
		}

		if let Some((name, value)) = var("CHUNK_SIZE") {
			config.keeper.chunk_size = parse_override(&name, &value)?;
		}

		if let Some((name, value)) = var("MAX_RETRY_COUNT") {
			config.keeper.max_retry_count = parse_override(&name, &value)?;
		}

		if let Some((name, value)) = var("GRACE_PERIOD_SECS") {
			config.keeper.grace_period_secs = parse_override(&name, &value)?;
		}

		Ok(())
	}

	/// Structural checks. Backend-specific tables are checked by the builder,
	/// which knows the schemas of the registered implementations.
	pub fn validate(config: &Config) -> Result<(), ConfigError> {
		let keeper = &config.keeper;

		if keeper.concurrency == 0 {
			return Err(ConfigError::ValidationError(
				"keeper.concurrency must be at least 1".to_string(),
			));
		}

		if keeper.chunk_size == 0 {
			return Err(ConfigError::ValidationError(
				"keeper.chunk_size must be at least 1".to_string(),
			));
		}

		if keeper.max_retry_count == 0 {
			return Err(ConfigError::ValidationError(
				"keeper.max_retry_count must be at least 1".to_string(),
			));
		}

		if keeper.tick_interval_secs == 0 {
			return Err(ConfigError::ValidationError(
				"keeper.tick_interval_secs must be at least 1".to_string(),
			));
		}

		if config.executor.timeout_secs == 0 {
			return Err(ConfigError::ValidationError(
				"executor.timeout_secs must be at least 1".to_string(),
			));
		}

		for (section, value) in [
			("storage.config", &config.storage.config),
			("account.config", &config.account.config),
			("executor.config", &config.executor.config),
		] {
			if !value.is_table() {
				return Err(ConfigError::ValidationError(format!("{} must be a table", section)));
			}
		}

		if config.discovery.enabled {
			if config.discovery.sources.is_empty() {
				return Err(ConfigError::ValidationError(
					"discovery is enabled but no sources are configured".to_string(),
				));
			}
			if config.discovery.poll_interval_secs == 0 {
				return Err(ConfigError::ValidationError(
					"discovery.poll_interval_secs must be at least 1".to_string(),
				));
			}
		}

		Ok(())
	}
}

/// Replaces every `${VAR}` with the value returned by `lookup`.
fn substitute_env_vars(
	content: &str,
	lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
	let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;

	let mut result = content.to_string();
	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(full_match, &value);
	}

	Ok(result)
}

fn set_table_key(target: &mut toml::Value, key: &str, value: String) {
	if !target.is_table() {
		*target = toml::Value::Table(toml::map::Map::new());
	}
	if let Some(table) = target.as_table_mut() {
		table.insert(key.to_string(), toml::Value::String(value));
	}
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
	T::Err: std::fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e| ConfigError::ValidationError(format!("Invalid {}: {}", name, e)))
}
