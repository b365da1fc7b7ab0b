//! Minimal Sui JSON-RPC client.
//!
//! Only the four calls the executor needs are modelled, and only the fields
//! it reads are decoded.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::DeliveryError;

/// `effects.status` of a dry run or an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutionStatus {
	pub status: String,
	#[serde(default)]
	pub error: Option<String>,
}

impl ExecutionStatus {
	pub fn success() -> Self {
		Self {
			status: "success".to_string(),
			error: None,
		}
	}

	pub fn failure(error: impl Into<String>) -> Self {
		Self {
			status: "failure".to_string(),
			error: Some(error.into()),
		}
	}

	pub fn is_success(&self) -> bool {
		self.status == "success"
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEffects {
	pub status: ExecutionStatus,
}

/// Response of `sui_executeTransactionBlock`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedTransaction {
	pub digest: String,
	#[serde(default)]
	pub effects: Option<TransactionEffects>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
	#[serde(rename = "type")]
	pub type_tag: String,
	#[serde(default)]
	pub package_id: String,
	#[serde(default)]
	pub parsed_json: Value,
}

/// Response of `sui_getTransactionBlock`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBlock {
	pub digest: String,
	#[serde(default)]
	pub effects: Option<TransactionEffects>,
	#[serde(default)]
	pub events: Vec<ChainEvent>,
	/// Checkpoint sequence number as a decimal string.
	#[serde(default)]
	pub checkpoint: Option<String>,
	#[serde(default)]
	pub timestamp_ms: Option<String>,
}

impl TransactionBlock {
	pub fn checkpoint_number(&self) -> Option<u64> {
		self.checkpoint.as_deref().and_then(|c| c.parse().ok())
	}

	pub fn timestamp_millis(&self) -> Option<i64> {
		self.timestamp_ms.as_deref().and_then(|t| t.parse().ok())
	}
}

/// Chain calls made by the Sui executor.
#[async_trait]
pub trait SuiRpcInterface: Send + Sync {
	/// `false` when the object does not exist or has been deleted.
	async fn object_exists(&self, object_id: &str) -> Result<bool, DeliveryError>;

	async fn dry_run(&self, tx_bytes: &str) -> Result<ExecutionStatus, DeliveryError>;

	/// Submits a signed transaction and waits for local execution.
	async fn execute(
		&self,
		tx_bytes: &str,
		signature: &str,
	) -> Result<ExecutedTransaction, DeliveryError>;

	async fn get_transaction(&self, digest: &str) -> Result<TransactionBlock, DeliveryError>;
}

#[derive(Deserialize)]
struct RpcResponse<T> {
	result: Option<T>,
	error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
	code: i64,
	message: String,
}

#[derive(Deserialize)]
struct ObjectResponse {
	data: Option<Value>,
	error: Option<ObjectError>,
}

#[derive(Deserialize)]
struct ObjectError {
	code: String,
}

#[derive(Deserialize)]
struct DryRunResponse {
	effects: TransactionEffects,
}

pub struct SuiRpcClient {
	http: reqwest::Client,
	url: String,
	next_id: AtomicU64,
}

impl SuiRpcClient {
	pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, DeliveryError> {
		let http = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| DeliveryError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

		Ok(Self {
			http,
			url: url.into(),
			next_id: AtomicU64::new(1),
		})
	}

	async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, DeliveryError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		debug!(method, id, "Sui RPC request");

		let body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let response = self
			.http
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(|e| DeliveryError::Network(format!("{} failed: {}", method, e)))?;

		let status = response.status();
		if !status.is_success() {
			return Err(DeliveryError::Network(format!("{} returned HTTP {}", method, status)));
		}

		let response: RpcResponse<T> = response
			.json()
			.await
			.map_err(|e| DeliveryError::Response(format!("{}: {}", method, e)))?;

		if let Some(error) = response.error {
			return Err(DeliveryError::Rpc {
				code: error.code,
				message: error.message,
			});
		}

		response
			.result
			.ok_or_else(|| DeliveryError::Response(format!("{} returned no result", method)))
	}
}

#[async_trait]
impl SuiRpcInterface for SuiRpcClient {
	async fn object_exists(&self, object_id: &str) -> Result<bool, DeliveryError> {
		let response: ObjectResponse = self
			.call("sui_getObject", json!([object_id, { "showType": true }]))
			.await?;

		match (response.data, response.error) {
			(Some(_), _) => Ok(true),
			(None, Some(error)) if error.code == "notExists" || error.code == "deleted" => Ok(false),
			(None, Some(error)) => Err(DeliveryError::Response(format!(
				"sui_getObject error: {}",
				error.code
			))),
			(None, None) => Err(DeliveryError::Response(
				"sui_getObject returned neither data nor error".to_string(),
			)),
		}
	}

	async fn dry_run(&self, tx_bytes: &str) -> Result<ExecutionStatus, DeliveryError> {
		let response: DryRunResponse = self
			.call("sui_dryRunTransactionBlock", json!([tx_bytes]))
			.await?;
		Ok(response.effects.status)
	}

	async fn execute(
		&self,
		tx_bytes: &str,
		signature: &str,
	) -> Result<ExecutedTransaction, DeliveryError> {
		self.call(
			"sui_executeTransactionBlock",
			json!([
				tx_bytes,
				[signature],
				{ "showEffects": true },
				"WaitForLocalExecution"
			]),
		)
		.await
	}

	async fn get_transaction(&self, digest: &str) -> Result<TransactionBlock, DeliveryError> {
		self.call(
			"sui_getTransactionBlock",
			json!([digest, { "showEffects": true, "showEvents": true }]),
		)
		.await
	}
}
