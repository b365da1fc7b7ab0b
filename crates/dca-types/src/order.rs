//! DCA order (escrow) types.
//!
//! A [`DcaOrder`] is the persisted view of one on-chain escrow: its schedule,
//! its progress and the bookkeeping the keeper needs to retry safely. Orders
//! are only mutated through [`OrderUpdate`], which mirrors the sparse
//! `update(escrowId, fields)` write of the order store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::events::{OrderClosedEvent, OrderCreatedEvent, OrderExecutedEvent};

/// On-chain object identifier of an escrow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscrowId(pub String);

impl EscrowId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EscrowId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for EscrowId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for EscrowId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Lifecycle status of an order.
///
/// `Pending` and `InProgress` are both active for scheduling; they only differ
/// in whether a tranche has executed yet. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
}

impl OrderStatus {
	pub fn is_active(&self) -> bool {
		matches!(self, OrderStatus::Pending | OrderStatus::InProgress)
	}

	pub fn is_terminal(&self) -> bool {
		!self.is_active()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OrderStatus::Pending => "pending",
			OrderStatus::InProgress => "in_progress",
			OrderStatus::Completed => "completed",
			OrderStatus::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// A dollar-cost-averaging position.
///
/// All amounts are integer minor units of the respective asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcaOrder {
	/// Escrow object id, immutable after creation.
	pub escrow_id: EscrowId,
	/// Digest of the transaction that placed the order, when known.
	pub escrow_digest: Option<String>,
	/// Address that owns the escrow.
	pub owner: String,
	/// Type tag of the asset being sold.
	pub input_type: String,
	/// Type tag of the asset being bought.
	pub output_type: String,
	/// Seconds between tranches.
	pub frequency: u64,
	/// Planned number of tranches.
	pub orders_total: u32,
	/// Tranches executed so far.
	pub orders_executed: u32,
	/// Input amount deposited at creation.
	pub base_total: u64,
	/// Input amount not yet swapped.
	pub base_remain: u64,
	/// Output amount accumulated so far.
	pub quote_received: u64,
	/// Input amount returned to the owner when the escrow closed.
	pub withdrawn_base: Option<u64>,
	/// Output amount returned to the owner when the escrow closed.
	pub withdrawn_quote: Option<u64>,
	/// Time of the last successful tranche.
	pub last_executed: Option<DateTime<Utc>>,
	/// Consecutive failures since the last success.
	pub retry_count: u32,
	pub status: OrderStatus,
	/// Schedule anchor.
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl DcaOrder {
	/// Builds a fresh `Pending` order from a placement event.
	pub fn from_created_event(
		event: &OrderCreatedEvent,
		digest: Option<String>,
		timestamp: DateTime<Utc>,
	) -> Self {
		Self {
			escrow_id: event.escrow.clone(),
			escrow_digest: digest,
			owner: event.owner.clone(),
			input_type: event.input_type.clone(),
			output_type: event.output_type.clone(),
			frequency: event.frequency,
			orders_total: event.orders,
			orders_executed: 0,
			base_total: event.amount,
			base_remain: event.amount,
			quote_received: 0,
			withdrawn_base: None,
			withdrawn_quote: None,
			last_executed: None,
			retry_count: 0,
			status: OrderStatus::Pending,
			created_at: timestamp,
			updated_at: timestamp,
		}
	}

	pub fn is_active(&self) -> bool {
		self.status.is_active()
	}

	/// Tranches still to be executed.
	pub fn remaining_tranches(&self) -> u32 {
		self.orders_total.saturating_sub(self.orders_executed)
	}

	/// Whether the next tranche is the final one.
	pub fn is_last_tranche(&self) -> bool {
		self.remaining_tranches() == 1
	}

	/// Input amount swapped per tranche.
	pub fn tranche_amount(&self) -> u64 {
		if self.orders_total == 0 {
			return 0;
		}
		self.base_total / u64::from(self.orders_total)
	}

	/// Update produced by one order-executed event.
	///
	/// Amounts are taken from the event as-is; the tranche counter advances by
	/// one and never past `orders_total`. A remaining balance that grows is
	/// logged rather than corrected, the chain being the source of truth.
	pub fn executed_update(&self, event: &OrderExecutedEvent, timestamp: DateTime<Utc>) -> OrderUpdate {
		let orders_executed = self.orders_executed.saturating_add(1).min(self.orders_total);
		if event.balance_x > self.base_remain {
			warn!(
				escrow_id = %self.escrow_id,
				stored = self.base_remain,
				reported = event.balance_x,
				"Executed event reports a larger remaining balance"
			);
		}
		OrderUpdate {
			orders_executed: Some(orders_executed),
			base_remain: Some(event.balance_x),
			quote_received: Some(self.quote_received.saturating_add(event.withdrawn_y)),
			last_executed: Some(timestamp),
			..OrderUpdate::at(timestamp)
		}
		.with_status(OrderStatus::InProgress)
		.with_retry_count(0)
	}

	/// Update produced by an order-closed event.
	pub fn closed_update(&self, event: &OrderClosedEvent, timestamp: DateTime<Utc>) -> OrderUpdate {
		if event.withdrawn_x > self.base_remain {
			warn!(
				escrow_id = %self.escrow_id,
				stored = self.base_remain,
				reported = event.withdrawn_x,
				"Closed event withdraws more than the remaining balance"
			);
		}
		OrderUpdate {
			base_remain: Some(event.withdrawn_x),
			quote_received: Some(self.quote_received.saturating_add(event.withdrawn_y)),
			withdrawn_base: Some(event.withdrawn_x),
			withdrawn_quote: Some(event.withdrawn_y),
			..OrderUpdate::at(timestamp)
		}
		.with_status(OrderStatus::Completed)
		.with_retry_count(0)
	}

	/// Applies a sparse update in place.
	pub fn apply(&mut self, update: &OrderUpdate) {
		if let Some(status) = update.status {
			self.status = status;
		}
		if let Some(retry_count) = update.retry_count {
			self.retry_count = retry_count;
		}
		if let Some(orders_executed) = update.orders_executed {
			self.orders_executed = orders_executed;
		}
		if let Some(base_remain) = update.base_remain {
			self.base_remain = base_remain;
		}
		if let Some(quote_received) = update.quote_received {
			self.quote_received = quote_received;
		}
		if let Some(withdrawn_base) = update.withdrawn_base {
			self.withdrawn_base = Some(withdrawn_base);
		}
		if let Some(withdrawn_quote) = update.withdrawn_quote {
			self.withdrawn_quote = Some(withdrawn_quote);
		}
		if let Some(last_executed) = update.last_executed {
			self.last_executed = Some(last_executed);
		}
		self.updated_at = update.updated_at;
	}
}

/// Field assignments for one order row.
///
/// `None` leaves the field untouched. `updated_at` is always written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
	pub status: Option<OrderStatus>,
	pub retry_count: Option<u32>,
	pub orders_executed: Option<u32>,
	pub base_remain: Option<u64>,
	pub quote_received: Option<u64>,
	pub withdrawn_base: Option<u64>,
	pub withdrawn_quote: Option<u64>,
	pub last_executed: Option<DateTime<Utc>>,
	pub updated_at: DateTime<Utc>,
}

impl OrderUpdate {
	/// An update that only touches `updated_at`.
	pub fn at(updated_at: DateTime<Utc>) -> Self {
		Self {
			status: None,
			retry_count: None,
			orders_executed: None,
			base_remain: None,
			quote_received: None,
			withdrawn_base: None,
			withdrawn_quote: None,
			last_executed: None,
			updated_at,
		}
	}

	pub fn with_status(mut self, status: OrderStatus) -> Self {
		self.status = Some(status);
		self
	}

	pub fn with_retry_count(mut self, retry_count: u32) -> Self {
		self.retry_count = Some(retry_count);
		self
	}

	/// Layers `other` on top of `self`; fields set in `other` win.
	pub fn merge(mut self, other: OrderUpdate) -> Self {
		self.status = other.status.or(self.status);
		self.retry_count = other.retry_count.or(self.retry_count);
		self.orders_executed = other.orders_executed.or(self.orders_executed);
		self.base_remain = other.base_remain.or(self.base_remain);
		self.quote_received = other.quote_received.or(self.quote_received);
		self.withdrawn_base = other.withdrawn_base.or(self.withdrawn_base);
		self.withdrawn_quote = other.withdrawn_quote.or(self.withdrawn_quote);
		self.last_executed = other.last_executed.or(self.last_executed);
		self.updated_at = self.updated_at.max(other.updated_at);
		self
	}
}

/// Filter used when listing orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
	All,
	Active,
	Status(OrderStatus),
}

impl OrderFilter {
	pub fn matches(&self, order: &DcaOrder) -> bool {
		match self {
			OrderFilter::All => true,
			OrderFilter::Active => order.is_active(),
			OrderFilter::Status(status) => order.status == *status,
		}
	}
}


#[cfg(test)]
mod tests {
	use super::fixtures::*;
	use super::*;
	use chrono::Duration;

	#[test]
	fn test_last_tranche_and_amount() {
		let mut o = order("0x1");
		assert!(!o.is_last_tranche());
		assert_eq!(o.tranche_amount(), 1_000);

		o.orders_executed = 2;
		assert!(o.is_last_tranche());

		o.orders_executed = 3;
		assert!(!o.is_last_tranche());
		assert_eq!(o.remaining_tranches(), 0);
	}

	#[test]
	fn test_apply_only_touches_set_fields() {
		let mut o = order("0x1");
		let later = t0() + Duration::seconds(40);
		let update = OrderUpdate::at(later)
			.with_status(OrderStatus::InProgress)
			.with_retry_count(0);

		o.apply(&update);
		assert_eq!(o.status, OrderStatus::InProgress);
		assert_eq!(o.base_remain, 3_000);
		assert_eq!(o.updated_at, later);
	}

	#[test]
	fn test_merge_prefers_later_fields() {
		let a = OrderUpdate {
			orders_executed: Some(1),
			base_remain: Some(2_000),
			..OrderUpdate::at(t0())
		}
		.with_status(OrderStatus::InProgress);
		let b = OrderUpdate::at(t0() + Duration::seconds(1)).with_status(OrderStatus::Completed);

		let merged = a.merge(b);
		assert_eq!(merged.status, Some(OrderStatus::Completed));
		assert_eq!(merged.orders_executed, Some(1));
		assert_eq!(merged.base_remain, Some(2_000));
	}

	#[test]
	fn test_executed_then_closed_updates() {
		let mut o = order("0x1");
		o.orders_executed = 2;
		o.base_remain = 1_000;
		o.quote_received = 1_980;

		let executed = OrderExecutedEvent {
			owner: "0xowner".into(),
			escrow: EscrowId::from("0x1"),
			withdrawn_y: 990,
			balance_x: 0,
			balance_y: 0,
			spent_x: 1_000,
			executed_order: 3,
		};
		let ts = t0() + Duration::seconds(95);
		let update = o.executed_update(&executed, ts);
		o.apply(&update);
		assert_eq!(o.orders_executed, 3);
		assert_eq!(o.quote_received, 2_970);
		assert_eq!(o.last_executed, Some(ts));
		assert_eq!(o.status, OrderStatus::InProgress);

		// A replayed event never pushes the counter past the plan.
		let again = o.executed_update(&executed, ts);
		assert_eq!(again.orders_executed, Some(3));

		let closed = OrderClosedEvent {
			escrow: EscrowId::from("0x1"),
			withdrawn_x: 0,
			withdrawn_y: 0,
		};
		let update = o.closed_update(&closed, ts);
		o.apply(&update);
		assert_eq!(o.status, OrderStatus::Completed);
		assert_eq!(o.withdrawn_base, Some(0));
		assert_eq!(o.quote_received, 2_970);
	}

	#[test]
	fn test_event_amounts_are_stored_as_reported() {
		let mut o = order("0x1");
		o.orders_executed = 1;
		o.base_remain = 1_000;

		let executed = OrderExecutedEvent {
			owner: "0xowner".into(),
			escrow: EscrowId::from("0x1"),
			withdrawn_y: 10,
			balance_x: 1_500,
			balance_y: 0,
			spent_x: 0,
			executed_order: 2,
		};
		let update = o.executed_update(&executed, t0());
		assert_eq!(update.base_remain, Some(1_500));
		o.apply(&update);

		let closed = OrderClosedEvent {
			escrow: EscrowId::from("0x1"),
			withdrawn_x: 2_000,
			withdrawn_y: 0,
		};
		let update = o.closed_update(&closed, t0());
		assert_eq!(update.base_remain, Some(2_000));
		assert_eq!(update.withdrawn_base, Some(2_000));
	}

	#[test]
	fn test_status_serde_shape() {
		let json = serde_json::to_string(&OrderStatus::InProgress).unwrap();
		assert_eq!(json, "\"in_progress\"");
		assert!(OrderStatus::Failed.is_terminal());
		assert!(OrderStatus::Pending.is_active());
	}
}
