//! Transaction building.
//!
//! The programmable transaction for an execute (oracle refresh, escrow
//! withdraw, aggregator swap, repay, optional clear) or a close is assembled
//! by an external builder service, which also owns aggregator routing. The
//! keeper only describes the action and gets unsigned transaction bytes back.

use async_trait::async_trait;
use dca_types::{serde_helpers::serialize_u64_string, EscrowId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildAction {
	Execute,
	Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
	pub action: BuildAction,
	pub sender: String,
	pub escrow_id: EscrowId,
	pub input_type: String,
	pub output_type: String,
	/// Input amount to swap; zero for a close.
	#[serde(serialize_with = "serialize_u64_string")]
	pub amount_in: u64,
	/// Also finalize the escrow in the same transaction.
	pub clear_escrow: bool,
	pub slippage_bps: u32,
}

#[async_trait]
pub trait TransactionBuilderInterface: Send + Sync {
	/// Returns base64 encoded unsigned transaction bytes.
	async fn build(&self, request: &BuildRequest) -> Result<String, DeliveryError>;
}

#[derive(Deserialize)]
struct BuildResponse {
	tx_bytes: String,
}

/// Builder reached over HTTP: `POST <url>` with a JSON [`BuildRequest`].
pub struct HttpTransactionBuilder {
	http: reqwest::Client,
	url: String,
}

impl HttpTransactionBuilder {
	pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, DeliveryError> {
		let http = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| DeliveryError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			http,
			url: url.into(),
		})
	}
}

#[async_trait]
impl TransactionBuilderInterface for HttpTransactionBuilder {
	async fn build(&self, request: &BuildRequest) -> Result<String, DeliveryError> {
		let response = self
			.http
			.post(&self.url)
			.json(request)
			.send()
			.await
			.map_err(|e| DeliveryError::Builder(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(DeliveryError::Builder(format!("HTTP {}: {}", status, body)));
		}

		let response: BuildResponse = response
			.json()
			.await
			.map_err(|e| DeliveryError::Builder(format!("Invalid response: {}", e)))?;

		if response.tx_bytes.is_empty() {
			return Err(DeliveryError::Builder("Empty transaction bytes".to_string()));
		}
		Ok(response.tx_bytes)
	}
}
