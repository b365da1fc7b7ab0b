//! Due-order selection.
//!
//! Classification is a pure function of the clock and the order row. An order
//! is due for close once its whole schedule plus the grace period has
//! elapsed; otherwise it is due for execute when no tranche has run yet or a
//! full interval has passed since the last one. Close is checked first.

use chrono::{DateTime, TimeDelta, Utc};
use dca_types::{Action, DcaOrder};
use std::fmt;
use std::time::Duration;

/// Why an order is not acted on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotDueReason {
	/// The next tranche is not yet due.
	Waiting,
	/// Completed or Failed.
	Terminal,
	/// Every tranche ran; waiting for the close deadline.
	AllTranchesFilled,
	/// Schedule fields that cannot produce a due time.
	Malformed(String),
}

impl fmt::Display for NotDueReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NotDueReason::Waiting => f.write_str("waiting"),
			NotDueReason::Terminal => f.write_str("terminal"),
			NotDueReason::AllTranchesFilled => f.write_str("all tranches filled"),
			NotDueReason::Malformed(reason) => write!(f, "malformed: {}", reason),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
	DueClose,
	DueExecute { is_last_order: bool },
	NotDue(NotDueReason),
}

impl Classification {
	/// The action to dispatch, if any.
	pub fn action(&self) -> Option<Action> {
		match self {
			Classification::DueClose => Some(Action::Close),
			Classification::DueExecute { is_last_order } => Some(Action::Execute {
				is_last_order: *is_last_order,
			}),
			Classification::NotDue(_) => None,
		}
	}
}

fn seconds(secs: u64) -> Option<TimeDelta> {
	i64::try_from(secs).ok().and_then(TimeDelta::try_seconds)
}

/// Moment from which the order is due for close.
fn close_deadline(order: &DcaOrder, grace_period: Duration) -> Result<DateTime<Utc>, String> {
	let schedule = order
		.frequency
		.checked_mul(u64::from(order.orders_total))
		.and_then(seconds)
		.ok_or_else(|| "schedule length overflows".to_string())?;
	let grace = TimeDelta::from_std(grace_period).map_err(|_| "grace period overflows".to_string())?;

	order
		.created_at
		.checked_add_signed(schedule)
		.and_then(|t| t.checked_add_signed(grace))
		.ok_or_else(|| "close deadline overflows".to_string())
}

pub fn classify(now: DateTime<Utc>, order: &DcaOrder, grace_period: Duration) -> Classification {
	if !order.is_active() {
		return Classification::NotDue(NotDueReason::Terminal);
	}
	if order.frequency == 0 {
		return Classification::NotDue(NotDueReason::Malformed("frequency is zero".into()));
	}
	if order.orders_total == 0 {
		return Classification::NotDue(NotDueReason::Malformed("orders_total is zero".into()));
	}

	let deadline = match close_deadline(order, grace_period) {
		Ok(deadline) => deadline,
		Err(reason) => return Classification::NotDue(NotDueReason::Malformed(reason)),
	};
	if now >= deadline {
		return Classification::DueClose;
	}

	if order.orders_executed >= order.orders_total {
		return Classification::NotDue(NotDueReason::AllTranchesFilled);
	}

	let due = match order.last_executed {
		None => true,
		Some(last) => match seconds(order.frequency).and_then(|f| last.checked_add_signed(f)) {
			Some(next) => now >= next,
			None => {
				return Classification::NotDue(NotDueReason::Malformed(
					"next execution time overflows".into(),
				))
			}
		},
	};

	if due {
		Classification::DueExecute {
			is_last_order: order.is_last_tranche(),
		}
	} else {
		Classification::NotDue(NotDueReason::Waiting)
	}
}

/// A batch of orders partitioned by classification.
#[derive(Debug, Default)]
pub struct Selection {
	pub due_close: Vec<DcaOrder>,
	pub due_execute: Vec<(DcaOrder, bool)>,
	pub not_due: Vec<(DcaOrder, NotDueReason)>,
}

impl Selection {
	/// Orders to dispatch, closes first.
	pub fn into_jobs(self) -> Vec<(DcaOrder, Action)> {
		self.due_close
			.into_iter()
			.map(|order| (order, Action::Close))
			.chain(
				self.due_execute
					.into_iter()
					.map(|(order, is_last_order)| (order, Action::Execute { is_last_order })),
			)
			.collect()
	}

	pub fn malformed(&self) -> impl Iterator<Item = (&DcaOrder, &str)> {
		self.not_due.iter().filter_map(|(order, reason)| match reason {
			NotDueReason::Malformed(why) => Some((order, why.as_str())),
			_ => None,
		})
	}

	pub fn due_count(&self) -> usize {
		self.due_close.len() + self.due_execute.len()
	}
}

pub fn select(now: DateTime<Utc>, orders: Vec<DcaOrder>, grace_period: Duration) -> Selection {
	let mut selection = Selection::default();
	for order in orders {
		match classify(now, &order, grace_period) {
			Classification::DueClose => selection.due_close.push(order),
			Classification::DueExecute { is_last_order } => {
				selection.due_execute.push((order, is_last_order))
			}
			Classification::NotDue(reason) => selection.not_due.push((order, reason)),
		}
	}
	selection
}
