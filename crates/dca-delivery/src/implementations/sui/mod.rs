//! Sui executor.
//!
//! One call performs: asset check, escrow existence check, build, dry run,
//! sign, submit, then a bounded wait for the committed transaction so that
//! its events can be reported back.

pub mod builder;
pub mod rpc;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use dca_account::AccountService;
use dca_types::{
	AssetRegistry, ConfigSchema, DcaEvent, DcaOrder, ErrorCode, ExecutionReceipt, FailureReason,
	Field, FieldType, Outcome, Schema,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use self::builder::{BuildAction, BuildRequest, HttpTransactionBuilder, TransactionBuilderInterface};
use self::rpc::{SuiRpcClient, SuiRpcInterface, TransactionBlock};
use crate::abort::classify_execution_error;
use crate::{DeliveryError, ExecutorInterface};

const DEFAULT_SLIPPAGE_BPS: u32 = 100;
const DEFAULT_FETCH_ATTEMPTS: u32 = 10;
const DEFAULT_FETCH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long to wait for a submitted transaction to become readable.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
	pub attempts: u32,
	pub interval: Duration,
}

impl Default for FetchPolicy {
	fn default() -> Self {
		Self {
			attempts: DEFAULT_FETCH_ATTEMPTS,
			interval: Duration::from_millis(DEFAULT_FETCH_INTERVAL_MS),
		}
	}
}

impl FetchPolicy {
	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			initial_interval: self.interval,
			max_interval: self.interval,
			multiplier: 1.0,
			randomization_factor: 0.0,
			max_elapsed_time: None,
			..Default::default()
		}
	}
}

pub struct SuiExecutor {
	rpc: Box<dyn SuiRpcInterface>,
	builder: Box<dyn TransactionBuilderInterface>,
	account: Arc<AccountService>,
	assets: AssetRegistry,
	package_id: String,
	slippage_bps: u32,
	fetch: FetchPolicy,
}

impl SuiExecutor {
	pub fn new(
		rpc: Box<dyn SuiRpcInterface>,
		builder: Box<dyn TransactionBuilderInterface>,
		account: Arc<AccountService>,
		assets: AssetRegistry,
		package_id: impl Into<String>,
	) -> Self {
		Self {
			rpc,
			builder,
			account,
			assets,
			package_id: package_id.into(),
			slippage_bps: DEFAULT_SLIPPAGE_BPS,
			fetch: FetchPolicy::default(),
		}
	}

	pub fn with_slippage_bps(mut self, slippage_bps: u32) -> Self {
		self.slippage_bps = slippage_bps;
		self
	}

	pub fn with_fetch_policy(mut self, fetch: FetchPolicy) -> Self {
		self.fetch = fetch;
		self
	}

	async fn submit(&self, order: &DcaOrder, action: BuildAction, clear_escrow: bool) -> Outcome {
		let escrow_id = &order.escrow_id;

		for tag in [&order.input_type, &order.output_type] {
			if let Err(e) = self.assets.resolve_type(tag) {
				warn!(%escrow_id, "Unsupported asset: {}", e);
				return Outcome::Failure(FailureReason::with_code(
					ErrorCode::UnsupportedAsset,
					e.to_string(),
				));
			}
		}

		match self.rpc.object_exists(escrow_id.as_str()).await {
			Ok(true) => {}
			Ok(false) => {
				info!(%escrow_id, "Escrow object not found");
				return Outcome::NotFound;
			}
			Err(e) => return transient(e),
		}

		let sender = match self.account.get_address().await {
			Ok(address) => address,
			Err(e) => return transient(e),
		};

		let request = BuildRequest {
			action,
			sender,
			escrow_id: escrow_id.clone(),
			input_type: order.input_type.clone(),
			output_type: order.output_type.clone(),
			amount_in: match action {
				BuildAction::Execute => order.tranche_amount(),
				BuildAction::Close => 0,
			},
			clear_escrow,
			slippage_bps: self.slippage_bps,
		};

		let tx_bytes = match self.builder.build(&request).await {
			Ok(tx_bytes) => tx_bytes,
			Err(e) => return transient(e),
		};

		match self.rpc.dry_run(&tx_bytes).await {
			Ok(status) if status.is_success() => {}
			Ok(status) => {
				let reason = classify_execution_error(status.error.as_deref().unwrap_or_default());
				warn!(%escrow_id, "Dry run rejected: {}", reason);
				return Outcome::Failure(reason);
			}
			Err(e) => return transient(e),
		}

		let raw = match STANDARD.decode(&tx_bytes) {
			Ok(raw) => raw,
			Err(e) => {
				return transient(DeliveryError::Builder(format!(
					"Transaction bytes are not base64: {}",
					e
				)))
			}
		};
		let signature = match self.account.sign(&raw).await {
			Ok(signature) => signature,
			Err(e) => return transient(DeliveryError::Signing(e.to_string())),
		};

		// A submission error leaves the commit state unknown. The next tick's
		// existence check and dry run settle it.
		let executed = match self.rpc.execute(&tx_bytes, &signature).await {
			Ok(executed) => executed,
			Err(e) => return transient(e),
		};

		if let Some(effects) = &executed.effects {
			if !effects.status.is_success() {
				let reason =
					classify_execution_error(effects.status.error.as_deref().unwrap_or_default());
				warn!(%escrow_id, digest = %executed.digest, "Transaction failed: {}", reason);
				return Outcome::Failure(reason);
			}
		}

		info!(%escrow_id, digest = %executed.digest, "Transaction submitted");

		match self.fetch_transaction(&executed.digest).await {
			Some(block) => Outcome::Success(self.receipt(block)),
			None => Outcome::Failure(FailureReason::with_code(
				ErrorCode::FailedFetch,
				format!("transaction {} not readable after submission", executed.digest),
			)),
		}
	}

	async fn fetch_transaction(&self, digest: &str) -> Option<TransactionBlock> {
		let mut backoff = self.fetch.backoff();
		let mut attempts = 0;

		loop {
			match self.rpc.get_transaction(digest).await {
				Ok(block) => return Some(block),
				Err(e) => {
					attempts += 1;

					if attempts >= self.fetch.attempts {
						warn!(
							digest,
							"Transaction fetch failed after {} attempts, giving up: {}", attempts, e
						);
						return None;
					}

					if let Some(delay) = backoff.next_backoff() {
						debug!(
							digest,
							"Transaction fetch attempt {}/{} failed, retrying in {:?}: {}",
							attempts,
							self.fetch.attempts,
							delay,
							e
						);
						tokio::time::sleep(delay).await;
					} else {
						return None;
					}
				}
			}
		}
	}

	fn receipt(&self, block: TransactionBlock) -> ExecutionReceipt {
		let checkpoint = block.checkpoint_number();
		let timestamp = block
			.timestamp_millis()
			.and_then(DateTime::from_timestamp_millis)
			.unwrap_or_else(Utc::now);

		let events = block
			.events
			.iter()
			.filter_map(|event| {
				match DcaEvent::from_chain_event(&self.package_id, &event.type_tag, &event.parsed_json)
				{
					Ok(decoded) => decoded,
					Err(e) => {
						warn!(digest = %block.digest, "Skipping undecodable event: {}", e);
						None
					}
				}
			})
			.collect();

		ExecutionReceipt {
			events,
			digest: block.digest,
			checkpoint,
			timestamp,
		}
	}
}

fn transient(error: impl std::fmt::Display) -> Outcome {
	warn!("Transient execution failure: {}", error);
	Outcome::Failure(FailureReason::transient(error.to_string()))
}

#[async_trait]
impl ExecutorInterface for SuiExecutor {
	async fn execute_tranche(&self, order: &DcaOrder, is_last_order: bool) -> Outcome {
		self.submit(order, BuildAction::Execute, is_last_order).await
	}

	async fn close_order(&self, order: &DcaOrder) -> Outcome {
		self.submit(order, BuildAction::Close, true).await
	}
}

/// Configuration schema for [`SuiExecutor`].
pub struct SuiExecutorSchema;

impl ConfigSchema for SuiExecutorSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), dca_types::ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("rpc_url", FieldType::Url),
				Field::new("builder_url", FieldType::Url),
				Field::new("package_id", FieldType::HexString { bytes: None }),
			],
			vec![
				Field::new(
					"slippage_bps",
					FieldType::Integer {
						min: Some(0),
						max: Some(10_000),
					},
				),
				Field::new(
					"fetch_attempts",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new(
					"fetch_interval_ms",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
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

/// Creates a Sui executor from `[executor.config]`.
///
/// Configuration parameters:
/// - `rpc_url`: full node JSON-RPC endpoint
/// - `builder_url`: transaction builder endpoint
/// - `package_id`: DCA package whose events are reported
/// - `slippage_bps`: swap slippage tolerance (default: 100)
/// - `fetch_attempts` / `fetch_interval_ms`: post-submit wait (default: 10 x 1000ms)
/// - `request_timeout_secs`: per HTTP request (default: 30)
pub fn create_executor(
	config: &toml::Value,
	account: Arc<AccountService>,
	assets: AssetRegistry,
) -> Result<Box<dyn ExecutorInterface>, DeliveryError> {
	SuiExecutorSchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	let str_field = |name: &str| {
		config
			.get(name)
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.ok_or_else(|| DeliveryError::Configuration(format!("{} is required", name)))
	};
	let int_field = |name: &str| config.get(name).and_then(|v| v.as_integer());

	let request_timeout = Duration::from_secs(
		int_field("request_timeout_secs")
			.map(|v| v as u64)
			.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
	);

	let rpc = SuiRpcClient::new(str_field("rpc_url")?, request_timeout)?;
	let builder = HttpTransactionBuilder::new(str_field("builder_url")?, request_timeout)?;

	let fetch = FetchPolicy {
		attempts: int_field("fetch_attempts")
			.map(|v| v as u32)
			.unwrap_or(DEFAULT_FETCH_ATTEMPTS),
		interval: Duration::from_millis(
			int_field("fetch_interval_ms")
				.map(|v| v as u64)
				.unwrap_or(DEFAULT_FETCH_INTERVAL_MS),
		),
	};

	let executor = SuiExecutor::new(
		Box::new(rpc),
		Box::new(builder),
		account,
		assets,
		str_field("package_id")?,
	)
	.with_slippage_bps(
		int_field("slippage_bps")
			.map(|v| v as u32)
			.unwrap_or(DEFAULT_SLIPPAGE_BPS),
	)
	.with_fetch_policy(fetch);

	Ok(Box::new(executor))
}

#[cfg(test)]
mod tests {
	use super::rpc::{ChainEvent, ExecutedTransaction, ExecutionStatus, TransactionEffects};
	use super::*;
	use dca_account::implementations::local::LocalWallet;
	use dca_types::{EscrowId, OrderStatus};
	use serde_json::json;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Mutex;

	const PKG: &str = "0xdca";
	const KEY: &str = "4ec5a9eefc0bb86027a6f3ba718793c813505acc25ed09447caf6a069accdd4b";

	#[derive(Default)]
	struct Calls {
		dry_runs: AtomicU32,
		executes: AtomicU32,
		fetches: AtomicU32,
	}

	struct ScriptedRpc {
		exists: bool,
		dry_run: ExecutionStatus,
		readable_after: Option<u32>,
		calls: Arc<Calls>,
	}

	#[async_trait]
	impl SuiRpcInterface for ScriptedRpc {
		async fn object_exists(&self, _object_id: &str) -> Result<bool, DeliveryError> {
			Ok(self.exists)
		}

		async fn dry_run(&self, _tx_bytes: &str) -> Result<ExecutionStatus, DeliveryError> {
			self.calls.dry_runs.fetch_add(1, Ordering::SeqCst);
			Ok(self.dry_run.clone())
		}

		async fn execute(
			&self,
			_tx_bytes: &str,
			signature: &str,
		) -> Result<ExecutedTransaction, DeliveryError> {
			assert!(!signature.is_empty());
			self.calls.executes.fetch_add(1, Ordering::SeqCst);
			Ok(ExecutedTransaction {
				digest: "D1".into(),
				effects: Some(TransactionEffects {
					status: ExecutionStatus::success(),
				}),
			})
		}

		async fn get_transaction(&self, digest: &str) -> Result<TransactionBlock, DeliveryError> {
			let n = self.calls.fetches.fetch_add(1, Ordering::SeqCst) + 1;
			match self.readable_after {
				Some(after) if n >= after => Ok(block(digest)),
				_ => Err(DeliveryError::Rpc {
					code: -32602,
					message: "Could not find the referenced transaction".into(),
				}),
			}
		}
	}

	#[derive(Default)]
	struct RecordingBuilder {
		requests: Mutex<Vec<BuildRequest>>,
	}

	#[async_trait]
	impl TransactionBuilderInterface for Arc<RecordingBuilder> {
		async fn build(&self, request: &BuildRequest) -> Result<String, DeliveryError> {
			self.requests.lock().unwrap().push(request.clone());
			Ok(STANDARD.encode(b"tx-bytes"))
		}
	}

	fn block(digest: &str) -> TransactionBlock {
		TransactionBlock {
			digest: digest.to_string(),
			effects: None,
			events: vec![
				ChainEvent {
					type_tag: format!("{}::event::OrderExecuted", PKG),
					package_id: PKG.into(),
					parsed_json: json!({
						"owner": "0xowner",
						"escrow": "0xe1",
						"withdrawn_y": "995",
						"balance_x": "2000",
						"balance_y": "0",
						"spent_x": "1000",
						"executed_order": "1"
					}),
				},
				ChainEvent {
					type_tag: "0xother::event::OrderExecuted".into(),
					package_id: "0xother".into(),
					parsed_json: json!({}),
				},
			],
			checkpoint: Some("77".into()),
			timestamp_ms: Some("1717243200000".into()),
		}
	}

	fn order(input_type: &str) -> DcaOrder {
		let now = Utc::now();
		DcaOrder {
			escrow_id: EscrowId::from("0xe1"),
			escrow_digest: None,
			owner: "0xowner".into(),
			input_type: input_type.into(),
			output_type: "0xdba34672e30cb065b1f93e3ab55318768fd6fef66c15942c9f7cb846e2f900e7::usdc::USDC"
				.into(),
			frequency: 30,
			orders_total: 3,
			orders_executed: 0,
			base_total: 3_000,
			base_remain: 3_000,
			quote_received: 0,
			withdrawn_base: None,
			withdrawn_quote: None,
			last_executed: None,
			retry_count: 0,
			status: OrderStatus::Pending,
			created_at: now,
			updated_at: now,
		}
	}

	fn executor(rpc: ScriptedRpc, builder: Arc<RecordingBuilder>) -> SuiExecutor {
		let account = Arc::new(AccountService::new(Box::new(LocalWallet::new(KEY).unwrap())));
		SuiExecutor::new(
			Box::new(rpc),
			Box::new(builder),
			account,
			AssetRegistry::default(),
			PKG,
		)
	}

	fn rpc(calls: &Arc<Calls>) -> ScriptedRpc {
		ScriptedRpc {
			exists: true,
			dry_run: ExecutionStatus::success(),
			readable_after: Some(1),
			calls: calls.clone(),
		}
	}

	#[tokio::test]
	async fn test_successful_execute_reports_package_events() {
		let calls = Arc::new(Calls::default());
		let builder = Arc::new(RecordingBuilder::default());
		let executor = executor(rpc(&calls), builder.clone());

		let outcome = executor.execute_tranche(&order("0x2::sui::SUI"), false).await;
		let Outcome::Success(receipt) = outcome else {
			panic!("expected success, got {:?}", outcome);
		};
		assert_eq!(receipt.digest, "D1");
		assert_eq!(receipt.checkpoint, Some(77));
		assert_eq!(receipt.timestamp.timestamp_millis(), 1_717_243_200_000);
		assert_eq!(receipt.events.len(), 1);
		assert!(matches!(receipt.events[0], DcaEvent::OrderExecuted(_)));

		let requests = builder.requests.lock().unwrap();
		assert_eq!(requests[0].action, BuildAction::Execute);
		assert_eq!(requests[0].amount_in, 1_000);
		assert!(!requests[0].clear_escrow);
		assert_eq!(calls.executes.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_close_clears_escrow_without_amount() {
		let calls = Arc::new(Calls::default());
		let builder = Arc::new(RecordingBuilder::default());
		let executor = executor(rpc(&calls), builder.clone());

		assert!(executor.close_order(&order("0x2::sui::SUI")).await.is_success());
		let requests = builder.requests.lock().unwrap();
		assert_eq!(requests[0].action, BuildAction::Close);
		assert_eq!(requests[0].amount_in, 0);
		assert!(requests[0].clear_escrow);
	}

	#[tokio::test]
	async fn test_unsupported_asset_is_rejected_before_chain_calls() {
		let calls = Arc::new(Calls::default());
		let executor = executor(rpc(&calls), Arc::new(RecordingBuilder::default()));

		let outcome = executor.execute_tranche(&order("0xabc::doge::DOGE"), false).await;
		assert_eq!(outcome.error_code(), ErrorCode::UnsupportedAsset);
		assert_eq!(calls.dry_runs.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_missing_escrow_is_not_found() {
		let calls = Arc::new(Calls::default());
		let mut scripted = rpc(&calls);
		scripted.exists = false;
		let executor = executor(scripted, Arc::new(RecordingBuilder::default()));

		assert_eq!(executor.close_order(&order("0x2::sui::SUI")).await, Outcome::NotFound);
	}

	#[tokio::test]
	async fn test_dry_run_abort_is_classified_and_not_submitted() {
		let calls = Arc::new(Calls::default());
		let mut scripted = rpc(&calls);
		scripted.dry_run = ExecutionStatus::failure(
			r#"MoveAbort(MoveLocation { module: ModuleId { address: dca, name: Identifier("dca") }, function: 3, instruction: 5, function_name: Some("execute_order") }, 104) in command 2"#,
		);
		let executor = executor(scripted, Arc::new(RecordingBuilder::default()));

		let outcome = executor.execute_tranche(&order("0x2::sui::SUI"), false).await;
		let Outcome::Failure(reason) = outcome else {
			panic!("expected failure");
		};
		assert_eq!(reason.code, Some(ErrorCode::AlreadyClaimed));
		assert_eq!(reason.function.as_deref(), Some("execute_order"));
		assert_eq!(calls.executes.load(Ordering::SeqCst), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unreadable_transaction_is_failed_fetch() {
		let calls = Arc::new(Calls::default());
		let mut scripted = rpc(&calls);
		scripted.readable_after = None;
		let executor = executor(scripted, Arc::new(RecordingBuilder::default()));

		let outcome = executor.execute_tranche(&order("0x2::sui::SUI"), true).await;
		assert_eq!(outcome.error_code(), ErrorCode::FailedFetch);
		assert_eq!(calls.fetches.load(Ordering::SeqCst), DEFAULT_FETCH_ATTEMPTS);
		assert_eq!(calls.executes.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_fetch_retries_until_readable() {
		let calls = Arc::new(Calls::default());
		let mut scripted = rpc(&calls);
		scripted.readable_after = Some(3);
		let executor = executor(scripted, Arc::new(RecordingBuilder::default()));

		assert!(executor.execute_tranche(&order("0x2::sui::SUI"), false).await.is_success());
		assert_eq!(calls.fetches.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn test_schema_requires_endpoints() {
		let config: toml::Value = toml::from_str(
			r#"
			rpc_url = "https://fullnode.mainnet.sui.io:443"
			builder_url = "http://localhost:8080/build"
			package_id = "0xdca"
			slippage_bps = 50
			"#,
		)
		.unwrap();
		assert!(SuiExecutorSchema.validate(&config).is_ok());

		let missing: toml::Value = toml::from_str(r#"rpc_url = "https://x""#).unwrap();
		assert!(SuiExecutorSchema.validate(&missing).is_err());

		let bad_slippage: toml::Value = toml::from_str(
			r#"
			rpc_url = "https://x"
			builder_url = "https://y"
			package_id = "0xdca"
			slippage_bps = 20000
			"#,
		)
		.unwrap();
		assert!(SuiExecutorSchema.validate(&bad_slippage).is_err());
	}
}
