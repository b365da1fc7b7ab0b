//! Sentio SQL event source.
//!
//! The indexer exposes one table per event kind. Each fetch is a single SQL
//! query selecting rows past a block number.

use crate::{DiscoveryError, EventSourceInterface, IndexedEvent};
use async_trait::async_trait;
use dca_types::{
	ConfigSchema, Field, FieldType, OrderClosedEvent, OrderCreatedEvent, OrderExecutedEvent, Schema,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CREATED_TABLE: &str = "Order Created";
const DEFAULT_EXECUTED_TABLE: &str = "Order Executed";
const DEFAULT_CLOSED_TABLE: &str = "Order Closed";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct SentioTables {
	pub created: String,
	pub executed: String,
	pub closed: String,
}

impl Default for SentioTables {
	fn default() -> Self {
		Self {
			created: DEFAULT_CREATED_TABLE.to_string(),
			executed: DEFAULT_EXECUTED_TABLE.to_string(),
			closed: DEFAULT_CLOSED_TABLE.to_string(),
		}
	}
}

#[derive(Deserialize)]
struct SqlResponse<T> {
	result: SqlResult<T>,
}

#[derive(Deserialize)]
struct SqlResult<T> {
	#[serde(default = "Vec::new")]
	rows: Vec<T>,
}

pub struct SentioSource {
	http: reqwest::Client,
	sql_url: String,
	api_key: String,
	tables: SentioTables,
}

impl SentioSource {
	pub fn new(
		sql_url: impl Into<String>,
		api_key: impl Into<String>,
		tables: SentioTables,
		request_timeout: Duration,
	) -> Result<Self, DiscoveryError> {
		let http = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| DiscoveryError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

		Ok(Self {
			http,
			sql_url: sql_url.into(),
			api_key: api_key.into(),
			tables,
		})
	}

	async fn query<T: DeserializeOwned>(
		&self,
		table: &str,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<T>>, DiscoveryError> {
		let sql = select_after(table, after_block);
		debug!(%sql, "Querying indexer");

		let response = self
			.http
			.post(&self.sql_url)
			.header("api-key", &self.api_key)
			.json(&json!({ "sqlQuery": { "sql": sql } }))
			.send()
			.await
			.map_err(|e| DiscoveryError::Network(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(DiscoveryError::Network(format!(
				"Indexer returned HTTP {} for `{}`",
				status, table
			)));
		}

		let response: SqlResponse<IndexedEvent<T>> = response
			.json()
			.await
			.map_err(|e| DiscoveryError::Response(format!("`{}`: {}", table, e)))?;

		Ok(response.result.rows)
	}
}

fn select_after(table: &str, after_block: u64) -> String {
	format!(
		"SELECT * FROM `{}` WHERE block_number > {} ORDER BY block_number",
		table.replace('`', ""),
		after_block
	)
}

#[async_trait]
impl EventSourceInterface for SentioSource {
	async fn fetch_created(
		&self,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<OrderCreatedEvent>>, DiscoveryError> {
		self.query(&self.tables.created, after_block).await
	}

	async fn fetch_executed(
		&self,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<OrderExecutedEvent>>, DiscoveryError> {
		self.query(&self.tables.executed, after_block).await
	}

	async fn fetch_closed(
		&self,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<OrderClosedEvent>>, DiscoveryError> {
		self.query(&self.tables.closed, after_block).await
	}
}

pub struct SentioSourceSchema;

impl ConfigSchema for SentioSourceSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), dca_types::ValidationError> {
		let non_empty = |value: &toml::Value| {
			if value.as_str().map(str::trim).unwrap_or_default().is_empty() {
				return Err("must not be empty".to_string());
			}
			Ok(())
		};

		let schema = Schema::new(
			vec![
				Field::new("sql_url", FieldType::Url),
				Field::new("api_key", FieldType::String).with_validator(non_empty),
			],
			vec![
				Field::new("created_table", FieldType::String).with_validator(non_empty),
				Field::new("executed_table", FieldType::String).with_validator(non_empty),
				Field::new("closed_table", FieldType::String).with_validator(non_empty),
				Field::new(
					"request_timeout_secs",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
			],
		);

		schema.validate(config)
	}
}

/// Creates a Sentio source from `[discovery.sources.sentio]`.
///
/// Configuration parameters:
/// - `sql_url`: SQL query endpoint of the indexer project
/// - `api_key`: sent as the `api-key` header
/// - `created_table` / `executed_table` / `closed_table`: table names
///   (default: "Order Created", "Order Executed", "Order Closed")
/// - `request_timeout_secs`: per request (default: 30)
pub fn create_source(config: &toml::Value) -> Result<Box<dyn EventSourceInterface>, DiscoveryError> {
	SentioSourceSchema
		.validate(config)
		.map_err(|e| DiscoveryError::Configuration(e.to_string()))?;

	let str_field = |name: &str| config.get(name).and_then(|v| v.as_str()).map(str::to_string);

	let sql_url = str_field("sql_url")
		.ok_or_else(|| DiscoveryError::Configuration("sql_url is required".to_string()))?;
	let api_key = str_field("api_key")
		.ok_or_else(|| DiscoveryError::Configuration("api_key is required".to_string()))?;

	let defaults = SentioTables::default();
	let tables = SentioTables {
		created: str_field("created_table").unwrap_or(defaults.created),
		executed: str_field("executed_table").unwrap_or(defaults.executed),
		closed: str_field("closed_table").unwrap_or(defaults.closed),
	};

	let timeout = config
		.get("request_timeout_secs")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

	Ok(Box::new(SentioSource::new(
		sql_url,
		api_key,
		tables,
		Duration::from_secs(timeout),
	)?))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_select_after() {
		assert_eq!(
			select_after("Order Executed", 42),
			"SELECT * FROM `Order Executed` WHERE block_number > 42 ORDER BY block_number"
		);
		assert_eq!(
			select_after("x` ; DROP", 0),
			"SELECT * FROM `x ; DROP` WHERE block_number > 0 ORDER BY block_number"
		);
	}

	#[test]
	fn test_decode_sql_response() {
		let body = serde_json::json!({
			"runtimeCost": "12",
			"result": {
				"columns": ["transaction_hash"],
				"rows": [{
					"transaction_hash": "Dg1",
					"block_number": 7,
					"timestamp": 1_717_243_200_000_i64,
					"owner": "0xowner",
					"escrow": "0xe1",
					"input_type": "0x2::sui::SUI",
					"output_type": "0xdba3::usdc::USDC",
					"amount": "3000",
					"orders": "3",
					"frequency": "30",
					"min_price": "0",
					"max_price": "0"
				}]
			}
		});
		let response: SqlResponse<IndexedEvent<OrderCreatedEvent>> =
			serde_json::from_value(body).unwrap();
		let row = &response.result.rows[0];
		assert_eq!(row.event.amount, 3_000);
		assert_eq!(row.event.orders, 3);
		assert_eq!(row.block_number, 7);
	}

	#[test]
	fn test_factory_validates_config() {
		let config: toml::Value = toml::from_str(
			r#"
			sql_url = "https://app.sentio.xyz/api/v1/analytics/acme/dca/sql/execute"
			api_key = "key"
			"#,
		)
		.unwrap();
		assert!(create_source(&config).is_ok());

		let missing_key: toml::Value =
			toml::from_str(r#"sql_url = "https://app.sentio.xyz/sql""#).unwrap();
		assert!(matches!(
			create_source(&missing_key),
			Err(DiscoveryError::Configuration(_))
		));

		let blank_key: toml::Value = toml::from_str(
			r#"
			sql_url = "https://app.sentio.xyz/sql"
			api_key = "  "
			"#,
		)
		.unwrap();
		assert!(create_source(&blank_key).is_err());
	}
}
