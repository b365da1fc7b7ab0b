//! The keeper tick loop.
//!
//! Each tick loads the active orders, classifies them against one clock
//! reading, dispatches the due ones through the [`Dispatcher`] and persists
//! what the [`reconcile`] step makes of every outcome. Ticks never overlap:
//! a tick that fires while the previous one is still settling is skipped.
//! Operator actions take the same lock, so they wait for a running tick
//! instead of racing it.

use crate::dispatcher::{Dispatcher, Job};
use crate::error::KeeperError;
use crate::reconciler::{reconcile, Transition, TransitionKind};
use crate::selector::select;
use chrono::{DateTime, Utc};
use dca_config::KeeperConfig;
use dca_delivery::DeliveryService;
use dca_storage::{FillApplied, OrderStore, StorageError};
use dca_types::{
	Action, DcaEvent, DcaOrder, EscrowId, ExecutionLogEntry, ExecutionReceipt, OrderFilter,
	OrderStatus, OrderUpdate, Outcome, TrancheFill,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Scheduling and retry policy the engine runs with.
#[derive(Debug, Clone)]
pub struct KeeperSettings {
	pub concurrency: usize,
	pub chunk_size: usize,
	pub max_retry_count: u32,
	pub grace_period: Duration,
	pub tick_interval: Duration,
}

impl From<&KeeperConfig> for KeeperSettings {
	fn from(config: &KeeperConfig) -> Self {
		Self {
			concurrency: config.concurrency,
			chunk_size: config.chunk_size,
			max_retry_count: config.max_retry_count,
			grace_period: config.grace_period(),
			tick_interval: config.tick_interval(),
		}
	}
}

impl Default for KeeperSettings {
	fn default() -> Self {
		Self::from(&KeeperConfig::default())
	}
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
	/// Another tick held the lock; nothing ran.
	pub skipped: bool,
	pub active: usize,
	pub due_close: usize,
	pub due_execute: usize,
	pub not_due: usize,
	pub malformed: usize,
	pub executed: usize,
	pub closed: usize,
	pub completed_by_not_found: usize,
	pub retried: usize,
	pub failed: usize,
	pub unchanged: usize,
	/// Outcomes that could not be persisted.
	pub store_errors: usize,
	pub elapsed_ms: u64,
}

impl TickReport {
	fn skipped() -> Self {
		Self {
			skipped: true,
			..Default::default()
		}
	}

	fn record(&mut self, kind: Option<TransitionKind>) {
		match kind {
			Some(TransitionKind::Executed) => self.executed += 1,
			Some(TransitionKind::Closed) => self.closed += 1,
			Some(TransitionKind::CompletedByNotFound) => self.completed_by_not_found += 1,
			Some(TransitionKind::Retried) => self.retried += 1,
			Some(TransitionKind::Failed) => self.failed += 1,
			Some(TransitionKind::Unchanged) => self.unchanged += 1,
			None => self.store_errors += 1,
		}
	}

	pub fn dispatched(&self) -> usize {
		self.due_close + self.due_execute
	}
}

/// Result of an operator-triggered execute or close.
#[derive(Debug, Clone)]
pub struct ActionReport {
	pub action: Action,
	pub outcome: Outcome,
	pub kind: TransitionKind,
	/// The order as stored after the action.
	pub order: DcaOrder,
}

/// Everything the keeper knows about one order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
	pub order: DcaOrder,
	pub execution_log: Vec<ExecutionLogEntry>,
	pub fills: Vec<TrancheFill>,
}

pub struct KeeperEngine {
	store: Arc<OrderStore>,
	delivery: Arc<DeliveryService>,
	dispatcher: Dispatcher,
	settings: KeeperSettings,
	tick_lock: Mutex<()>,
}

impl KeeperEngine {
	pub fn new(
		store: Arc<OrderStore>,
		delivery: Arc<DeliveryService>,
		settings: KeeperSettings,
	) -> Self {
		let dispatcher = Dispatcher::new(delivery.clone(), settings.concurrency, settings.chunk_size);
		Self {
			store,
			delivery,
			dispatcher,
			settings,
			tick_lock: Mutex::new(()),
		}
	}

	pub async fn tick(&self) -> TickReport {
		self.tick_at(Utc::now()).await
	}

	/// Runs one tick with `now` as the clock for selection and bookkeeping.
	pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
		let Ok(_guard) = self.tick_lock.try_lock() else {
			debug!("Previous tick still running, skipping");
			return TickReport::skipped();
		};
		let started = Instant::now();
		let mut report = TickReport::default();

		let orders = match self.store.list_active().await {
			Ok(orders) => orders,
			Err(e) => {
				error!("Failed to load active orders: {}", e);
				report.store_errors += 1;
				return report;
			}
		};
		report.active = orders.len();
		if orders.is_empty() {
			return report;
		}

		let selection = select(now, orders, self.settings.grace_period);
		for (order, reason) in selection.malformed() {
			warn!(escrow_id = %order.escrow_id, "Skipping malformed order: {}", reason);
			report.malformed += 1;
		}
		report.due_close = selection.due_close.len();
		report.due_execute = selection.due_execute.len();
		report.not_due = selection.not_due.len();

		if selection.due_count() > 0 {
			info!(
				active = report.active,
				due_close = report.due_close,
				due_execute = report.due_execute,
				"Dispatching due orders"
			);
			let jobs: Vec<Job> = selection.into_jobs().into_iter().map(Job::from).collect();
			let kinds = self
				.dispatcher
				.dispatch(jobs, |job, outcome| self.settle(job, outcome, now))
				.await;
			for kind in kinds {
				report.record(kind);
			}
		}

		report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
		report
	}

	/// Reconciles one outcome and persists it. `None` when the store failed.
	async fn settle(&self, job: Job, outcome: Outcome, now: DateTime<Utc>) -> Option<TransitionKind> {
		let transition = reconcile(
			&job.order,
			job.action,
			&outcome,
			now,
			self.settings.max_retry_count,
		);
		log_outcome(&job, &outcome, &transition);

		match self.persist(&job.order, job.action, &outcome, &transition, now).await {
			Ok((kind, _)) => Some(kind),
			Err(e) => {
				error!(escrow_id = %job.order.escrow_id, "Failed to persist outcome: {}", e);
				None
			}
		}
	}

	/// Writes a transition back to the store.
	///
	/// The update is recomputed from the row as stored at write time, so a
	/// tranche already applied by ingestion is not applied twice.
	async fn persist(
		&self,
		order: &DcaOrder,
		action: Action,
		outcome: &Outcome,
		transition: &Transition,
		now: DateTime<Utc>,
	) -> Result<(TransitionKind, Option<DcaOrder>), StorageError> {
		let max_retry_count = self.settings.max_retry_count;
		let recompute = |current: &DcaOrder| reconcile(current, action, outcome, now, max_retry_count);

		let persisted = match transition.fills.split_first() {
			Some((first, rest)) => {
				let applied = self
					.store
					.apply_fill(first, |current| {
						recompute(current)
							.update
							.unwrap_or_else(|| OrderUpdate::at(now))
					})
					.await?;
				for fill in rest {
					if let Err(e) = self.store.record_fill(fill).await {
						warn!(escrow_id = %fill.escrow_id, digest = %fill.digest, "Failed to record fill: {}", e);
					}
				}
				match applied {
					FillApplied::Applied(row) => (transition.kind, Some(row)),
					FillApplied::Duplicate => {
						debug!(escrow_id = %order.escrow_id, digest = %first.digest, "Fill already recorded");
						match without_fills(outcome) {
							Some(closing) => self.persist_close(order, action, &closing, now).await?,
							None => (TransitionKind::Unchanged, None),
						}
					}
					FillApplied::UnknownOrder => return Err(StorageError::NotFound),
				}
			}
			None if transition.update.is_some() => {
				match self
					.store
					.modify(&order.escrow_id, |current| recompute(current).update)
					.await?
				{
					Some(row) => (transition.kind, Some(row)),
					None => (TransitionKind::Unchanged, None),
				}
			}
			None => (TransitionKind::Unchanged, None),
		};

		if let Err(e) = self.store.append_execution_log(&transition.log).await {
			warn!(escrow_id = %order.escrow_id, "Failed to append execution log: {}", e);
		}
		Ok(persisted)
	}

	/// Applies the close half of a receipt whose fill ingestion already
	/// recorded.
	async fn persist_close(
		&self,
		order: &DcaOrder,
		action: Action,
		closing: &Outcome,
		now: DateTime<Utc>,
	) -> Result<(TransitionKind, Option<DcaOrder>), StorageError> {
		let max_retry_count = self.settings.max_retry_count;
		let row = self
			.store
			.modify(&order.escrow_id, |current| {
				reconcile(current, action, closing, now, max_retry_count).update
			})
			.await?;
		Ok(match row {
			Some(row) if row.status == OrderStatus::Completed => (TransitionKind::Closed, Some(row)),
			Some(row) => (TransitionKind::Unchanged, Some(row)),
			None => (TransitionKind::Unchanged, None),
		})
	}

	async fn load(&self, escrow_id: &EscrowId) -> Result<DcaOrder, KeeperError> {
		self.store
			.get(escrow_id)
			.await?
			.ok_or_else(|| KeeperError::OrderNotFound(escrow_id.clone()))
	}

	/// Executes the next tranche of one order now, regardless of schedule.
	///
	/// Failed orders are accepted; a success resets their retry count.
	pub async fn execute_order(&self, escrow_id: &EscrowId) -> Result<ActionReport, KeeperError> {
		let _guard = self.tick_lock.lock().await;
		let order = self.load(escrow_id).await?;
		if order.status == OrderStatus::Completed {
			return Err(invalid(&order, "order is completed"));
		}
		if order.remaining_tranches() == 0 {
			return Err(invalid(&order, "all tranches executed, close the order instead"));
		}
		let action = Action::Execute {
			is_last_order: order.is_last_tranche(),
		};
		self.run_action(order, action).await
	}

	/// Closes one order now and withdraws its balances.
	pub async fn close_order(&self, escrow_id: &EscrowId) -> Result<ActionReport, KeeperError> {
		let _guard = self.tick_lock.lock().await;
		let order = self.load(escrow_id).await?;
		if order.status == OrderStatus::Completed {
			return Err(invalid(&order, "order is completed"));
		}
		self.run_action(order, Action::Close).await
	}

	/// Caller holds the tick lock.
	async fn run_action(&self, order: DcaOrder, action: Action) -> Result<ActionReport, KeeperError> {
		info!(escrow_id = %order.escrow_id, %action, "Running operator action");
		let outcome = self.delivery.execute(&order, action).await;
		let now = Utc::now();
		let transition = reconcile(&order, action, &outcome, now, self.settings.max_retry_count);
		let job = Job {
			order: order.clone(),
			action,
		};
		log_outcome(&job, &outcome, &transition);

		let (kind, row) = self.persist(&order, action, &outcome, &transition, now).await?;
		let order = match row {
			Some(row) => row,
			None => self.load(&order.escrow_id).await?,
		};
		Ok(ActionReport {
			action,
			outcome,
			kind,
			order,
		})
	}

	/// Returns a failed order to scheduling with a clean retry count.
	pub async fn reset_order(&self, escrow_id: &EscrowId) -> Result<DcaOrder, KeeperError> {
		let _guard = self.tick_lock.lock().await;
		let order = self.load(escrow_id).await?;
		if order.status != OrderStatus::Failed {
			return Err(invalid(&order, "only failed orders can be reset"));
		}
		let status = if order.orders_executed > 0 {
			OrderStatus::InProgress
		} else {
			OrderStatus::Pending
		};
		let update = OrderUpdate::at(Utc::now())
			.with_status(status)
			.with_retry_count(0);
		let order = self.store.update(escrow_id, &update).await?;
		info!(escrow_id = %escrow_id, status = %order.status, "Order reset");
		Ok(order)
	}

	pub async fn order_status(&self, escrow_id: &EscrowId) -> Result<OrderDetails, KeeperError> {
		let order = self.load(escrow_id).await?;
		let execution_log = self.store.execution_logs(escrow_id).await?;
		let fills = self.store.fills(escrow_id).await?;
		Ok(OrderDetails {
			order,
			execution_log,
			fills,
		})
	}

	pub async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<DcaOrder>, KeeperError> {
		Ok(self.store.list(filter).await?)
	}

	/// Ticks every `tick_interval` until `shutdown` resolves. A tick that has
	/// started always runs to completion.
	pub async fn run<F>(&self, shutdown: F)
	where
		F: Future<Output = ()> + Send,
	{
		let mut interval = tokio::time::interval(self.settings.tick_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		tokio::pin!(shutdown);

		info!(
			tick_interval = ?self.settings.tick_interval,
			concurrency = self.dispatcher.concurrency(),
			"Keeper started"
		);
		loop {
			tokio::select! {
				_ = interval.tick() => {
					let report = self.tick().await;
					if report.dispatched() > 0 || report.store_errors > 0 {
						info!(
							executed = report.executed,
							closed = report.closed,
							completed_by_not_found = report.completed_by_not_found,
							retried = report.retried,
							failed = report.failed,
							store_errors = report.store_errors,
							elapsed_ms = report.elapsed_ms,
							"Tick finished"
						);
					}
				}
				_ = &mut shutdown => {
					info!("Keeper stopping");
					break;
				}
			}
		}
	}
}

fn invalid(order: &DcaOrder, reason: &str) -> KeeperError {
	KeeperError::InvalidState {
		escrow_id: order.escrow_id.clone(),
		reason: reason.to_string(),
	}
}

/// The receipt with its executed events dropped, when something else is left.
fn without_fills(outcome: &Outcome) -> Option<Outcome> {
	let Outcome::Success(receipt) = outcome else {
		return None;
	};
	let events: Vec<DcaEvent> = receipt
		.events
		.iter()
		.filter(|event| !matches!(event, DcaEvent::OrderExecuted(_)))
		.cloned()
		.collect();
	if events.is_empty() {
		return None;
	}
	Some(Outcome::Success(ExecutionReceipt {
		events,
		..receipt.clone()
	}))
}

fn log_outcome(job: &Job, outcome: &Outcome, transition: &Transition) {
	let escrow_id = &job.order.escrow_id;
	let action = job.action;
	match (outcome, transition.kind) {
		(Outcome::Success(receipt), TransitionKind::Unchanged) => {
			if job.order.status != OrderStatus::Completed {
				warn!(%escrow_id, %action, digest = %receipt.digest, "Transaction committed without order events");
			}
		}
		(Outcome::Success(receipt), kind) => {
			info!(%escrow_id, %action, digest = %receipt.digest, ?kind, "Action committed");
		}
		(Outcome::NotFound, _) => {
			info!(%escrow_id, %action, "Escrow no longer exists, completing order");
		}
		(Outcome::Failure(reason), TransitionKind::Failed) => {
			error!(
				%escrow_id,
				%action,
				code = ?reason.code,
				"Order failed after {} attempts: {}",
				job.order.retry_count.saturating_add(1),
				reason.message
			);
		}
		(Outcome::Failure(reason), _) => {
			warn!(
				%escrow_id,
				%action,
				code = ?reason.code,
				retry = job.order.retry_count.saturating_add(1),
				"Action failed: {}",
				reason.message
			);
		}
	}
}
