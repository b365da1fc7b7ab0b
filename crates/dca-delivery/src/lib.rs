//! Remote execution of keeper actions.
//!
//! An executor performs at most one on-chain submission per call and reports
//! what happened as an [`Outcome`]. It never retries a submission itself;
//! retry policy belongs to the keeper engine. [`DeliveryService`] wraps the
//! configured executor with a hard timeout and panic isolation so that a
//! single misbehaving call resolves to a failure instead of stalling a tick.

use async_trait::async_trait;
use dca_types::{Action, DcaOrder, ErrorCode, FailureReason, Outcome};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

pub mod abort;

pub mod implementations {
	pub mod sui;
}

#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("Unexpected response: {0}")]
	Response(String),
	#[error("Transaction builder error: {0}")]
	Builder(String),
	#[error("Signing error: {0}")]
	Signing(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Performs one on-chain action for an order.
#[async_trait]
pub trait ExecutorInterface: Send + Sync {
	/// Swaps one tranche. With `is_last_order` the same transaction also
	/// finalizes the escrow.
	async fn execute_tranche(&self, order: &DcaOrder, is_last_order: bool) -> Outcome;

	/// Finalizes the escrow and withdraws its balances.
	async fn close_order(&self, order: &DcaOrder) -> Outcome;
}

/// Lets a caller keep a handle on an executor it hands to [`DeliveryService`].
#[async_trait]
impl<T: ExecutorInterface + ?Sized> ExecutorInterface for Arc<T> {
	async fn execute_tranche(&self, order: &DcaOrder, is_last_order: bool) -> Outcome {
		(**self).execute_tranche(order, is_last_order).await
	}

	async fn close_order(&self, order: &DcaOrder) -> Outcome {
		(**self).close_order(order).await
	}
}

pub struct DeliveryService {
	executor: Box<dyn ExecutorInterface>,
	timeout: Duration,
}

impl DeliveryService {
	pub fn new(executor: Box<dyn ExecutorInterface>, timeout: Duration) -> Self {
		Self { executor, timeout }
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Runs `action` for `order`. Always resolves to an outcome.
	pub async fn execute(&self, order: &DcaOrder, action: Action) -> Outcome {
		let call = async {
			match action {
				Action::Execute { is_last_order } => {
					self.executor.execute_tranche(order, is_last_order).await
				}
				Action::Close => self.executor.close_order(order).await,
			}
		};

		match tokio::time::timeout(self.timeout, AssertUnwindSafe(call).catch_unwind()).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(panic)) => {
				let message = panic_message(panic.as_ref());
				error!(escrow_id = %order.escrow_id, %action, "Executor panicked: {}", message);
				Outcome::Failure(FailureReason::with_code(
					ErrorCode::Panicked,
					format!("executor panicked: {}", message),
				))
			}
			Err(_) => {
				warn!(
					escrow_id = %order.escrow_id,
					%action,
					"Executor call timed out after {:?}",
					self.timeout
				);
				Outcome::Failure(FailureReason::with_code(
					ErrorCode::Timeout,
					format!("no result within {:?}", self.timeout),
				))
			}
		}
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use dca_types::{EscrowId, ExecutionReceipt, OrderStatus};

	fn order() -> DcaOrder {
		let now = Utc::now();
		DcaOrder {
			escrow_id: EscrowId::from("0xe1"),
			escrow_digest: None,
			owner: "0xowner".into(),
			input_type: "0x2::sui::SUI".into(),
			output_type: "0xdba3::usdc::USDC".into(),
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

	enum Behaviour {
		Succeed,
		Hang,
		Panic,
	}

	struct TestExecutor(Behaviour);

	#[async_trait]
	impl ExecutorInterface for TestExecutor {
		async fn execute_tranche(&self, _order: &DcaOrder, _is_last_order: bool) -> Outcome {
			match self.0 {
				Behaviour::Succeed => Outcome::Success(ExecutionReceipt {
					events: vec![],
					digest: "D1".into(),
					checkpoint: None,
					timestamp: Utc::now(),
				}),
				Behaviour::Hang => {
					tokio::time::sleep(Duration::from_secs(3_600)).await;
					Outcome::NotFound
				}
				Behaviour::Panic => panic!("boom"),
			}
		}

		async fn close_order(&self, _order: &DcaOrder) -> Outcome {
			Outcome::NotFound
		}
	}

	#[tokio::test]
	async fn test_routes_by_action() {
		let service = DeliveryService::new(
			Box::new(TestExecutor(Behaviour::Succeed)),
			Duration::from_secs(5),
		);
		let executed = service
			.execute(&order(), Action::Execute { is_last_order: false })
			.await;
		assert_eq!(executed.digest(), Some("D1"));
		assert_eq!(service.execute(&order(), Action::Close).await, Outcome::NotFound);
	}

	#[tokio::test]
	async fn test_shared_executor_is_accepted() {
		let executor = Arc::new(TestExecutor(Behaviour::Succeed));
		let service = DeliveryService::new(Box::new(executor.clone()), Duration::from_secs(5));
		let outcome = service
			.execute(&order(), Action::Execute { is_last_order: false })
			.await;
		assert!(outcome.is_success());
		assert_eq!(Arc::strong_count(&executor), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_timeout_becomes_failure() {
		let service = DeliveryService::new(
			Box::new(TestExecutor(Behaviour::Hang)),
			Duration::from_secs(120),
		);
		let outcome = service
			.execute(&order(), Action::Execute { is_last_order: false })
			.await;
		assert_eq!(outcome.error_code(), ErrorCode::Timeout);
	}

	#[tokio::test]
	async fn test_panic_becomes_failure() {
		let service = DeliveryService::new(
			Box::new(TestExecutor(Behaviour::Panic)),
			Duration::from_secs(5),
		);
		let outcome = service
			.execute(&order(), Action::Execute { is_last_order: true })
			.await;
		assert_eq!(outcome.error_code(), ErrorCode::Panicked);
	}
}
