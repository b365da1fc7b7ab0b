//! Folding indexed events into the order store.

use async_trait::async_trait;
use dca_storage::{FillApplied, OrderStore};
use dca_types::{
	DcaOrder, OrderClosedEvent, OrderCreatedEvent, OrderExecutedEvent, OrderStatus, TrancheFill,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{DiscoveryError, EventSourceInterface, IndexedEvent};

/// An event kind ingestion follows, with its own cursor.
#[async_trait]
trait Ingested: Sized + Send + Sync + 'static {
	const KIND: &'static str;

	async fn fetch(
		source: &dyn EventSourceInterface,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<Self>>, DiscoveryError>;

	/// Folds one event into the store; `false` when it changed nothing.
	async fn apply(service: &IngestionService, item: &IndexedEvent<Self>) -> Result<bool, DiscoveryError>;
}

#[async_trait]
impl Ingested for OrderCreatedEvent {
	const KIND: &'static str = "created";

	async fn fetch(
		source: &dyn EventSourceInterface,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<Self>>, DiscoveryError> {
		source.fetch_created(after_block).await
	}

	async fn apply(service: &IngestionService, item: &IndexedEvent<Self>) -> Result<bool, DiscoveryError> {
		service.apply_created(item).await
	}
}

#[async_trait]
impl Ingested for OrderExecutedEvent {
	const KIND: &'static str = "executed";

	async fn fetch(
		source: &dyn EventSourceInterface,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<Self>>, DiscoveryError> {
		source.fetch_executed(after_block).await
	}

	async fn apply(service: &IngestionService, item: &IndexedEvent<Self>) -> Result<bool, DiscoveryError> {
		service.apply_executed(item).await
	}
}

#[async_trait]
impl Ingested for OrderClosedEvent {
	const KIND: &'static str = "closed";

	async fn fetch(
		source: &dyn EventSourceInterface,
		after_block: u64,
	) -> Result<Vec<IndexedEvent<Self>>, DiscoveryError> {
		source.fetch_closed(after_block).await
	}

	async fn apply(service: &IngestionService, item: &IndexedEvent<Self>) -> Result<bool, DiscoveryError> {
		service.apply_closed(item).await
	}
}

/// Result of syncing one event kind from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindReport {
	pub fetched: usize,
	pub applied: usize,
	pub skipped: usize,
	/// Cursor persisted after the sync.
	pub cursor: u64,
	pub error: Option<String>,
}

impl KindReport {
	fn fail(&mut self, kind: &str, source: &str, e: DiscoveryError) {
		error!(source, kind, "Ingestion failed: {}", e);
		self.error = Some(e.to_string());
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
	pub source: String,
	pub created: KindReport,
	pub executed: KindReport,
	pub closed: KindReport,
}

/// Tracks the highest block whose events have all been applied.
///
/// Events are applied in block order; a block only counts as done once an
/// event from a later block starts, or the batch finishes cleanly.
#[derive(Debug)]
struct CursorTracker {
	committed: u64,
	in_progress: Option<u64>,
}

impl CursorTracker {
	fn new(start: u64) -> Self {
		Self {
			committed: start,
			in_progress: None,
		}
	}

	fn begin(&mut self, block: u64) {
		if let Some(current) = self.in_progress {
			if block > current {
				self.committed = current;
			}
		}
		self.in_progress = Some(block);
	}

	fn finish(&self, clean: bool) -> u64 {
		match self.in_progress {
			Some(block) if clean => block.max(self.committed),
			_ => self.committed,
		}
	}
}

fn cursor_key(source: &str, kind: &str) -> String {
	format!("{}:{}", source, kind)
}

fn after<T>(mut events: Vec<IndexedEvent<T>>, start: u64) -> Vec<IndexedEvent<T>> {
	events.retain(|e| e.block_number > start);
	events.sort_by_key(|e| e.block_number);
	events
}

pub struct IngestionService {
	store: Arc<OrderStore>,
	sources: Vec<(String, Box<dyn EventSourceInterface>)>,
	poll_interval: Duration,
}

impl IngestionService {
	pub fn new(store: Arc<OrderStore>, poll_interval: Duration) -> Self {
		Self {
			store,
			sources: Vec::new(),
			poll_interval,
		}
	}

	pub fn with_source(mut self, name: impl Into<String>, source: Box<dyn EventSourceInterface>) -> Self {
		self.sources.push((name.into(), source));
		self
	}

	pub fn source_count(&self) -> usize {
		self.sources.len()
	}

	/// Runs one pass over every source: created, then executed, then closed.
	///
	/// A failure in one kind is reported and does not stop the others.
	pub async fn sync_once(&self) -> Vec<SyncReport> {
		let mut reports = Vec::with_capacity(self.sources.len());

		for (name, source) in &self.sources {
			let report = SyncReport {
				source: name.clone(),
				created: self.sync_kind::<OrderCreatedEvent>(name, source.as_ref()).await,
				executed: self.sync_kind::<OrderExecutedEvent>(name, source.as_ref()).await,
				closed: self.sync_kind::<OrderClosedEvent>(name, source.as_ref()).await,
			};

			info!(
				source = %name,
				created = report.created.applied,
				executed = report.executed.applied,
				closed = report.closed.applied,
				"Ingestion pass complete"
			);
			reports.push(report);
		}

		reports
	}

	/// Polls on a fixed interval until `shutdown` resolves. A pass in flight
	/// always finishes first.
	pub async fn run<F>(&self, shutdown: F)
	where
		F: Future<Output = ()> + Send,
	{
		tokio::pin!(shutdown);
		let mut interval = tokio::time::interval(self.poll_interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

		info!(
			sources = self.sources.len(),
			"Ingestion started, polling every {:?}", self.poll_interval
		);

		loop {
			tokio::select! {
				_ = &mut shutdown => {
					info!("Ingestion stopped");
					break;
				}
				_ = interval.tick() => {
					self.sync_once().await;
				}
			}
		}
	}

	async fn start_cursor(&self, key: &str) -> Result<u64, DiscoveryError> {
		Ok(self.store.cursor(key).await?.unwrap_or(0))
	}

	async fn commit_cursor(&self, key: &str, tracker: &CursorTracker, report: &mut KindReport) {
		let cursor = tracker.finish(report.error.is_none());
		report.cursor = cursor;
		if let Err(e) = self.store.set_cursor(key, cursor).await {
			warn!(cursor = key, "Failed to persist cursor: {}", e);
		}
	}

	/// Fetches one event kind after its cursor and applies it in block order.
	async fn sync_kind<E: Ingested>(&self, name: &str, source: &dyn EventSourceInterface) -> KindReport {
		let key = cursor_key(name, E::KIND);
		let mut report = KindReport::default();

		let start = match self.start_cursor(&key).await {
			Ok(start) => start,
			Err(e) => {
				report.fail(E::KIND, name, e);
				return report;
			}
		};
		report.cursor = start;

		let events = match E::fetch(source, start).await {
			Ok(events) => after(events, start),
			Err(e) => {
				report.fail(E::KIND, name, e);
				return report;
			}
		};
		report.fetched = events.len();

		let mut tracker = CursorTracker::new(start);
		for item in &events {
			tracker.begin(item.block_number);
			match E::apply(self, item).await {
				Ok(true) => report.applied += 1,
				Ok(false) => report.skipped += 1,
				Err(e) => {
					report.fail(E::KIND, name, e);
					break;
				}
			}
		}

		self.commit_cursor(&key, &tracker, &mut report).await;
		report
	}

	async fn apply_created(
		&self,
		item: &IndexedEvent<OrderCreatedEvent>,
	) -> Result<bool, DiscoveryError> {
		let order = DcaOrder::from_created_event(&item.event, Some(item.digest.clone()), item.timestamp);
		let inserted = self.store.insert(&order).await?;
		if inserted {
			info!(
				escrow_id = %order.escrow_id,
				orders = order.orders_total,
				frequency = order.frequency,
				"New order"
			);
		} else {
			debug!(escrow_id = %order.escrow_id, "Order already known");
		}
		Ok(inserted)
	}

	async fn apply_executed(
		&self,
		item: &IndexedEvent<OrderExecutedEvent>,
	) -> Result<bool, DiscoveryError> {
		let fill = TrancheFill::from_event(
			&item.event,
			&item.digest,
			Some(item.block_number),
			item.timestamp,
		);

		let applied = self
			.store
			.apply_fill(&fill, |order| {
				let mut update = order.executed_update(&item.event, item.timestamp);
				// Progress is recorded, but a settled order is not reopened.
				if order.status.is_terminal() {
					update.status = None;
				}
				update
			})
			.await?;

		match applied {
			FillApplied::Applied(order) => {
				info!(
					escrow_id = %order.escrow_id,
					digest = %item.digest,
					executed = order.orders_executed,
					total = order.orders_total,
					"Tranche executed"
				);
				Ok(true)
			}
			FillApplied::Duplicate => Ok(false),
			FillApplied::UnknownOrder => {
				error!(escrow_id = %item.event.escrow, digest = %item.digest, "Executed event for unknown order");
				Ok(false)
			}
		}
	}

	async fn apply_closed(
		&self,
		item: &IndexedEvent<OrderClosedEvent>,
	) -> Result<bool, DiscoveryError> {
		let event = &item.event;
		let timestamp = item.timestamp;
		if self.store.get(&event.escrow).await?.is_none() {
			error!(escrow_id = %event.escrow, "Closed event for unknown order");
			return Ok(false);
		}

		let updated = self
			.store
			.modify(&event.escrow, |order| {
				(order.status != OrderStatus::Completed).then(|| order.closed_update(event, timestamp))
			})
			.await?;

		if let Some(order) = &updated {
			info!(escrow_id = %order.escrow_id, "Order closed");
		}
		Ok(updated.is_some())
	}
}
