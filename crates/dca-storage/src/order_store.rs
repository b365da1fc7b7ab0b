//! Order-level persistence.
//!
//! Everything the keeper persists lives in one [`StorageService`]:
//!
//! | namespace       | id                              | value               |
//! |-----------------|---------------------------------|---------------------|
//! | `orders`        | escrow id                       | [`DcaOrder`]        |
//! | `active`        | escrow id                       | escrow id           |
//! | `execution_log` | `<escrow>:<millis>:<seq>`       | [`ExecutionLogEntry`] |
//! | `fills`         | `<escrow>:<digest>`             | [`TrancheFill`]     |
//! | `cursors`       | cursor name                     | block number        |
//!
//! `active` indexes the rows in `Pending` or `InProgress` so a tick does not
//! read finished orders. It is written together with the row, under the
//! store's write lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use dca_types::{DcaOrder, EscrowId, ExecutionLogEntry, OrderFilter, OrderUpdate, TrancheFill};

use crate::{StorageError, StorageService};

const ORDERS: &str = "orders";
const ACTIVE: &str = "active";
const EXECUTION_LOG: &str = "execution_log";
const FILLS: &str = "fills";
const CURSORS: &str = "cursors";

/// Result of [`OrderStore::apply_fill`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillApplied {
	/// The fill was new; holds the updated order row.
	Applied(DcaOrder),
	/// A fill with the same digest was already recorded for this escrow.
	Duplicate,
	/// No order row exists for the fill's escrow.
	UnknownOrder,
}

pub struct OrderStore {
	storage: Arc<StorageService>,
	/// Serializes read-modify-write of order rows.
	write_lock: Mutex<()>,
	log_seq: AtomicU64,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			write_lock: Mutex::new(()),
			log_seq: AtomicU64::new(0),
		}
	}

	pub async fn get(&self, escrow_id: &EscrowId) -> Result<Option<DcaOrder>, StorageError> {
		self.storage.retrieve_optional(ORDERS, escrow_id.as_str()).await
	}

	/// Inserts a new order. Returns `false` and leaves the stored row alone
	/// when the escrow is already known.
	pub async fn insert(&self, order: &DcaOrder) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		if self.storage.exists(ORDERS, order.escrow_id.as_str()).await? {
			return Ok(false);
		}
		self.write_row(order).await?;
		debug!(escrow_id = %order.escrow_id, "Inserted order");
		Ok(true)
	}

	/// Applies a sparse update to one order and returns the new row.
	pub async fn update(
		&self,
		escrow_id: &EscrowId,
		update: &OrderUpdate,
	) -> Result<DcaOrder, StorageError> {
		let _guard = self.write_lock.lock().await;
		let mut order: DcaOrder = self.storage.retrieve(ORDERS, escrow_id.as_str()).await?;
		order.apply(update);
		self.write_row(&order).await?;
		Ok(order)
	}

	/// Computes an update from the current row and applies it, all under the
	/// write lock. Returns `None` when the order is missing or `f` declines.
	pub async fn modify<F>(
		&self,
		escrow_id: &EscrowId,
		f: F,
	) -> Result<Option<DcaOrder>, StorageError>
	where
		F: FnOnce(&DcaOrder) -> Option<OrderUpdate> + Send,
	{
		let _guard = self.write_lock.lock().await;
		let Some(mut order) = self
			.storage
			.retrieve_optional::<DcaOrder>(ORDERS, escrow_id.as_str())
			.await?
		else {
			return Ok(None);
		};
		let Some(update) = f(&order) else {
			return Ok(None);
		};
		order.apply(&update);
		self.write_row(&order).await?;
		Ok(Some(order))
	}

	pub async fn list(&self, filter: OrderFilter) -> Result<Vec<DcaOrder>, StorageError> {
		let orders: Vec<(String, DcaOrder)> = self.storage.list(ORDERS, "").await?;
		Ok(orders
			.into_iter()
			.map(|(_, order)| order)
			.filter(|order| filter.matches(order))
			.collect())
	}

	/// Orders in `Pending` or `InProgress`, read through the active index.
	pub async fn list_active(&self) -> Result<Vec<DcaOrder>, StorageError> {
		let ids: Vec<(String, String)> = self.storage.list(ACTIVE, "").await?;
		let mut orders = Vec::with_capacity(ids.len());
		for (id, _) in ids {
			match self.storage.retrieve_optional::<DcaOrder>(ORDERS, &id).await? {
				Some(order) if order.is_active() => orders.push(order),
				_ => debug!(escrow_id = %id, "Stale active index entry"),
			}
		}
		Ok(orders)
	}

	/// Stores a row and keeps the active index in step with its status.
	/// Callers hold the write lock.
	async fn write_row(&self, order: &DcaOrder) -> Result<(), StorageError> {
		let id = order.escrow_id.as_str();
		self.storage.store(ORDERS, id, order).await?;
		if order.is_active() {
			self.storage.store(ACTIVE, id, &id).await
		} else {
			self.storage.remove(ACTIVE, id).await
		}
	}

	fn fill_id(escrow_id: &EscrowId, digest: &str) -> String {
		format!("{}:{}", escrow_id, digest)
	}

	pub async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<(), StorageError> {
		let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
		let id = format!(
			"{}:{:020}:{:010}",
			entry.escrow_id,
			entry.created_at.timestamp_millis().max(0),
			seq
		);
		self.storage.store(EXECUTION_LOG, &id, entry).await
	}

	/// Execution log of one order, oldest first.
	pub async fn execution_logs(
		&self,
		escrow_id: &EscrowId,
	) -> Result<Vec<ExecutionLogEntry>, StorageError> {
		let prefix = format!("{}:", escrow_id);
		let entries: Vec<(String, ExecutionLogEntry)> =
			self.storage.list(EXECUTION_LOG, &prefix).await?;
		Ok(entries.into_iter().map(|(_, entry)| entry).collect())
	}

	pub async fn record_fill(&self, fill: &TrancheFill) -> Result<(), StorageError> {
		let id = Self::fill_id(&fill.escrow_id, &fill.digest);
		self.storage.store(FILLS, &id, fill).await
	}

	/// Whether a fill for `escrow_id` was already recorded from `digest`.
	pub async fn has_fill(&self, digest: &str, escrow_id: &EscrowId) -> Result<bool, StorageError> {
		self.storage
			.exists(FILLS, &Self::fill_id(escrow_id, digest))
			.await
	}

	pub async fn fills(&self, escrow_id: &EscrowId) -> Result<Vec<TrancheFill>, StorageError> {
		let prefix = format!("{}:", escrow_id);
		let fills: Vec<(String, TrancheFill)> = self.storage.list(FILLS, &prefix).await?;
		let mut fills: Vec<TrancheFill> = fills.into_iter().map(|(_, fill)| fill).collect();
		fills.sort_by_key(|fill| fill.tranche);
		Ok(fills)
	}

	/// Records a tranche fill and applies the order update derived from it,
	/// at most once per `(digest, escrow)`.
	///
	/// The update is computed from the stored row under the write lock, so a
	/// fill reported both by the keeper's own receipt and by ingestion moves
	/// the order exactly once.
	pub async fn apply_fill<F>(&self, fill: &TrancheFill, update: F) -> Result<FillApplied, StorageError>
	where
		F: FnOnce(&DcaOrder) -> OrderUpdate + Send,
	{
		let _guard = self.write_lock.lock().await;
		let fill_id = Self::fill_id(&fill.escrow_id, &fill.digest);
		if self.storage.exists(FILLS, &fill_id).await? {
			return Ok(FillApplied::Duplicate);
		}

		let Some(mut order) = self
			.storage
			.retrieve_optional::<DcaOrder>(ORDERS, fill.escrow_id.as_str())
			.await?
		else {
			return Ok(FillApplied::UnknownOrder);
		};

		let update = update(&order);
		order.apply(&update);
		self.write_row(&order).await?;
		self.storage.store(FILLS, &fill_id, fill).await?;
		debug!(escrow_id = %order.escrow_id, digest = %fill.digest, "Applied fill");
		Ok(FillApplied::Applied(order))
	}

	pub async fn cursor(&self, name: &str) -> Result<Option<u64>, StorageError> {
		self.storage.retrieve_optional(CURSORS, name).await
	}

	pub async fn set_cursor(&self, name: &str, block: u64) -> Result<(), StorageError> {
		self.storage.store(CURSORS, name, &block).await
	}
}
