//! Shared fixtures for the engine tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dca_delivery::ExecutorInterface;
use dca_storage::implementations::memory::MemoryStorage;
use dca_storage::{OrderStore, StorageService};
use dca_types::{
	DcaEvent, DcaOrder, EscrowId, ExecutionReceipt, FailureReason, OrderClosedEvent,
	OrderExecutedEvent, OrderStatus, Outcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn t0() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Three tranches of 1000, thirty seconds apart, placed at [`t0`].
pub fn order(id: &str) -> DcaOrder {
	DcaOrder {
		escrow_id: EscrowId::from(id),
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
		created_at: t0(),
		updated_at: t0(),
	}
}

pub fn store() -> Arc<OrderStore> {
	Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
		MemoryStorage::new(),
	)))))
}

pub fn executed_event(order: &DcaOrder, out: u64) -> DcaEvent {
	let spent = order.tranche_amount();
	DcaEvent::OrderExecuted(OrderExecutedEvent {
		owner: order.owner.clone(),
		escrow: order.escrow_id.clone(),
		withdrawn_y: out,
		balance_x: order.base_remain.saturating_sub(spent),
		balance_y: 0,
		spent_x: spent,
		executed_order: order.orders_executed + 1,
	})
}

pub fn closed_event(escrow: &str, withdrawn_x: u64, withdrawn_y: u64) -> DcaEvent {
	DcaEvent::OrderClosed(OrderClosedEvent {
		escrow: EscrowId::from(escrow),
		withdrawn_x,
		withdrawn_y,
	})
}

pub fn success(digest: &str, events: Vec<DcaEvent>, at: DateTime<Utc>) -> Outcome {
	Outcome::Success(ExecutionReceipt {
		events,
		digest: digest.to_string(),
		checkpoint: Some(100),
		timestamp: at,
	})
}

/// How the scripted executor answers for one escrow.
#[derive(Clone)]
pub enum Script {
	/// Emit an executed event (plus a closed event on the last tranche), or
	/// a closed event for a close.
	Fill,
	NotFound,
	Abort(u32),
	Panic,
}

/// Executor answering from a per-escrow script, tracking calls and the
/// number of calls in flight.
#[derive(Default)]
pub struct ScriptedExecutor {
	scripts: Mutex<HashMap<String, Script>>,
	pub calls: Mutex<Vec<(String, bool)>>,
	in_flight: AtomicUsize,
	pub max_in_flight: AtomicUsize,
	pub delay: Duration,
}

impl ScriptedExecutor {
	pub fn with_delay(delay: Duration) -> Self {
		Self {
			delay,
			..Default::default()
		}
	}

	pub fn script(&self, escrow: &str, script: Script) {
		self.scripts.lock().unwrap().insert(escrow.to_string(), script);
	}

	pub fn call_count(&self, escrow: &str) -> usize {
		self.calls
			.lock()
			.unwrap()
			.iter()
			.filter(|(id, _)| id == escrow)
			.count()
	}

	async fn answer(&self, order: &DcaOrder, close: bool, is_last_order: bool) -> Outcome {
		self.calls
			.lock()
			.unwrap()
			.push((order.escrow_id.to_string(), close));
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);

		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		self.in_flight.fetch_sub(1, Ordering::SeqCst);

		let script = self
			.scripts
			.lock()
			.unwrap()
			.get(order.escrow_id.as_str())
			.cloned()
			.unwrap_or(Script::Fill);

		let digest = format!("D-{}-{}", order.escrow_id, order.orders_executed);
		let at = t0() + chrono::TimeDelta::seconds(1_000);
		match script {
			Script::Fill if close => success(
				&digest,
				vec![closed_event(order.escrow_id.as_str(), order.base_remain, 0)],
				at,
			),
			Script::Fill => {
				let mut events = vec![executed_event(order, 990)];
				if is_last_order {
					events.push(closed_event(order.escrow_id.as_str(), 0, 0));
				}
				success(&digest, events, at)
			}
			Script::NotFound => Outcome::NotFound,
			Script::Abort(code) => Outcome::Failure(FailureReason::abort(
				Some("execute_order".into()),
				code,
				format!("MoveAbort {}", code),
			)),
			Script::Panic => panic!("scripted panic for {}", order.escrow_id),
		}
	}
}

#[async_trait]
impl ExecutorInterface for ScriptedExecutor {
	async fn execute_tranche(&self, order: &DcaOrder, is_last_order: bool) -> Outcome {
		self.answer(order, false, is_last_order).await
	}

	async fn close_order(&self, order: &DcaOrder) -> Outcome {
		self.answer(order, true, false).await
	}
}
