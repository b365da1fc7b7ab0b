//! Outcome reconciliation.
//!
//! Turns one executor outcome into the next state of the order. The function
//! is pure; the engine persists what it returns.
//!
//! | outcome                        | effect                                          |
//! |--------------------------------|-------------------------------------------------|
//! | success with executed event    | progress from the event, retry reset, InProgress |
//! | success with closed event      | withdrawn amounts recorded, Completed           |
//! | success without known events   | nothing                                         |
//! | not found                      | Completed                                       |
//! | failure                        | retry + 1, Failed at the ceiling                |
//!
//! Completed orders never change. Failed orders ignore further failures.

use chrono::{DateTime, Utc};
use dca_types::{
	Action, DcaEvent, DcaOrder, ExecutionLogEntry, OrderStatus, OrderUpdate, Outcome, TrancheFill,
};

/// What a transition did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
	/// One or more tranches were recorded and the order stays active.
	Executed,
	/// The order reached Completed through a committed close.
	Closed,
	/// The escrow is gone on chain; the order is Completed.
	CompletedByNotFound,
	/// Failure counted; the order stays eligible.
	Retried,
	/// Failure hit the retry ceiling.
	Failed,
	/// Nothing to persist.
	Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
	pub kind: TransitionKind,
	/// `None` leaves the stored row untouched.
	pub update: Option<OrderUpdate>,
	/// Fills derived from executed events, in event order.
	pub fills: Vec<TrancheFill>,
	pub log: ExecutionLogEntry,
}

pub fn reconcile(
	order: &DcaOrder,
	action: Action,
	outcome: &Outcome,
	now: DateTime<Utc>,
	max_retry_count: u32,
) -> Transition {
	let log = ExecutionLogEntry::from_outcome(&order.escrow_id, action, outcome, now);
	let unchanged = |log: ExecutionLogEntry| Transition {
		kind: TransitionKind::Unchanged,
		update: None,
		fills: Vec::new(),
		log,
	};

	if order.status == OrderStatus::Completed {
		return unchanged(log);
	}

	match outcome {
		Outcome::NotFound => Transition {
			kind: TransitionKind::CompletedByNotFound,
			update: Some(
				OrderUpdate::at(now)
					.with_status(OrderStatus::Completed)
					.with_retry_count(0),
			),
			fills: Vec::new(),
			log,
		},

		Outcome::Failure(_) => {
			if order.status == OrderStatus::Failed {
				return unchanged(log);
			}
			let retry_count = order.retry_count.saturating_add(1);
			let exhausted = retry_count >= max_retry_count;
			let mut update = OrderUpdate::at(now).with_retry_count(retry_count);
			if exhausted {
				update = update.with_status(OrderStatus::Failed);
			}
			Transition {
				kind: if exhausted {
					TransitionKind::Failed
				} else {
					TransitionKind::Retried
				},
				update: Some(update),
				fills: Vec::new(),
				log,
			}
		}

		Outcome::Success(receipt) => {
			let mut working = order.clone();
			let mut update: Option<OrderUpdate> = None;
			let mut fills = Vec::new();

			for event in &receipt.events {
				if event.escrow() != &order.escrow_id {
					continue;
				}
				let step = match event {
					DcaEvent::OrderExecuted(executed) => {
						fills.push(TrancheFill::from_event(
							executed,
							&receipt.digest,
							receipt.checkpoint,
							receipt.timestamp,
						));
						working.executed_update(executed, receipt.timestamp)
					}
					DcaEvent::OrderClosed(closed) => working.closed_update(closed, receipt.timestamp),
					DcaEvent::OrderCreated(_) => continue,
				};
				working.apply(&step);
				update = Some(match update {
					Some(previous) => previous.merge(step),
					None => step,
				});
			}

			let Some(mut update) = update else {
				return unchanged(log);
			};
			update.updated_at = now;

			Transition {
				kind: if working.status == OrderStatus::Completed {
					TransitionKind::Closed
				} else {
					TransitionKind::Executed
				},
				update: Some(update),
				fills,
				log,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{closed_event, executed_event, order, success, t0};
	use chrono::TimeDelta;
	use dca_types::{ErrorCode, FailureReason};

	const MAX_RETRY: u32 = 10;

	fn execute() -> Action {
		Action::Execute {
			is_last_order: false,
		}
	}

	fn apply(order: &DcaOrder, transition: &Transition) -> DcaOrder {
		let mut next = order.clone();
		if let Some(update) = &transition.update {
			next.apply(update);
		}
		next
	}

	#[test]
	fn test_slippage_failure_counts_a_retry() {
		let o = order("0x1");
		let outcome = Outcome::Failure(FailureReason::abort(Some("repay_order".into()), 101, "slippage"));
		let transition = reconcile(&o, execute(), &outcome, t0(), MAX_RETRY);

		assert_eq!(transition.kind, TransitionKind::Retried);
		let next = apply(&o, &transition);
		assert_eq!(next.retry_count, 1);
		assert_eq!(next.status, o.status);
		assert_eq!(transition.log.error_code, ErrorCode::InsufficientRepaidAmount);
		assert_eq!(transition.log.function.as_deref(), Some("repay_order"));
	}

	#[test]
	fn test_retry_ceiling_marks_failed_then_stops() {
		let mut o = order("0x1");
		let outcome = Outcome::Failure(FailureReason::transient("rpc unavailable"));

		for _ in 0..MAX_RETRY {
			let transition = reconcile(&o, execute(), &outcome, t0(), MAX_RETRY);
			o = apply(&o, &transition);
		}
		assert_eq!(o.status, OrderStatus::Failed);
		assert_eq!(o.retry_count, MAX_RETRY);

		let extra = reconcile(&o, execute(), &outcome, t0(), MAX_RETRY);
		assert_eq!(extra.kind, TransitionKind::Unchanged);
		assert_eq!(apply(&o, &extra).retry_count, MAX_RETRY);
		// The attempt is still logged.
		assert_eq!(extra.log.error_code, ErrorCode::UnknownError);
	}

	#[test]
	fn test_not_found_completes_and_is_idempotent() {
		let o = order("0x1");
		let transition = reconcile(&o, Action::Close, &Outcome::NotFound, t0(), MAX_RETRY);
		assert_eq!(transition.kind, TransitionKind::CompletedByNotFound);
		assert_eq!(transition.log.digest, None);
		assert_eq!(transition.log.error_code, ErrorCode::NotFound);

		let done = apply(&o, &transition);
		assert_eq!(done.status, OrderStatus::Completed);

		let replay = reconcile(&done, Action::Close, &Outcome::NotFound, t0(), MAX_RETRY);
		assert_eq!(replay.kind, TransitionKind::Unchanged);
		assert_eq!(apply(&done, &replay), done);
	}

	#[test]
	fn test_executed_event_moves_progress_from_payload() {
		let o = order("0x1");
		let at = t0() + TimeDelta::seconds(31);
		let outcome = success("Dg1", vec![executed_event(&o, 990)], at);
		let now = at + TimeDelta::seconds(2);

		let transition = reconcile(&o, execute(), &outcome, now, MAX_RETRY);
		assert_eq!(transition.kind, TransitionKind::Executed);
		assert_eq!(transition.fills.len(), 1);
		assert_eq!(transition.fills[0].digest, "Dg1");
		assert_eq!(transition.log.digest.as_deref(), Some("Dg1"));

		let next = apply(&o, &transition);
		assert_eq!(next.orders_executed, 1);
		assert_eq!(next.base_remain, 2_000);
		assert_eq!(next.quote_received, 990);
		assert_eq!(next.last_executed, Some(at));
		assert_eq!(next.status, OrderStatus::InProgress);
		assert_eq!(next.retry_count, 0);
		assert_eq!(next.updated_at, now);
	}

	#[test]
	fn test_last_tranche_with_close_completes() {
		let mut o = order("0x1");
		o.orders_executed = 2;
		o.base_remain = 1_000;
		o.quote_received = 1_980;
		o.retry_count = 3;
		o.status = OrderStatus::InProgress;

		let outcome = success(
			"Dg3",
			vec![executed_event(&o, 990), closed_event("0x1", 0, 0)],
			t0() + TimeDelta::seconds(95),
		);
		let transition = reconcile(
			&o,
			Action::Execute {
				is_last_order: true,
			},
			&outcome,
			t0() + TimeDelta::seconds(96),
			MAX_RETRY,
		);
		assert_eq!(transition.kind, TransitionKind::Closed);

		let next = apply(&o, &transition);
		assert_eq!(next.status, OrderStatus::Completed);
		assert_eq!(next.orders_executed, 3);
		assert_eq!(next.base_remain, 0);
		assert_eq!(next.quote_received, 2_970);
		assert_eq!(next.withdrawn_base, Some(0));
		assert_eq!(next.retry_count, 0);
	}

	#[test]
	fn test_close_records_withdrawn_amounts() {
		let mut o = order("0x1");
		o.orders_executed = 2;
		o.base_remain = 1_000;
		o.quote_received = 1_980;

		let outcome = success("Dg4", vec![closed_event("0x1", 1_000, 0)], t0());
		let next = apply(&o, &reconcile(&o, Action::Close, &outcome, t0(), MAX_RETRY));
		assert_eq!(next.status, OrderStatus::Completed);
		assert_eq!(next.withdrawn_base, Some(1_000));
		assert_eq!(next.base_remain, 1_000);
		assert_eq!(next.quote_received, 1_980);
	}

	#[test]
	fn test_success_without_known_events_changes_nothing() {
		let mut o = order("0x1");
		o.retry_count = 4;
		let foreign = success("Dg5", vec![closed_event("0xother", 1, 1)], t0());
		let transition = reconcile(&o, execute(), &foreign, t0(), MAX_RETRY);

		assert_eq!(transition.kind, TransitionKind::Unchanged);
		assert!(transition.fills.is_empty());
		assert_eq!(transition.log.error_code, ErrorCode::Success);
		assert_eq!(apply(&o, &transition).retry_count, 4);
	}

	#[test]
	fn test_failed_order_accepts_operator_success() {
		let mut o = order("0x1");
		o.status = OrderStatus::Failed;
		o.retry_count = MAX_RETRY;

		let outcome = success("Dg6", vec![executed_event(&o, 990)], t0());
		let next = apply(&o, &reconcile(&o, execute(), &outcome, t0(), MAX_RETRY));
		assert_eq!(next.status, OrderStatus::InProgress);
		assert_eq!(next.retry_count, 0);
	}

	#[test]
	fn test_completed_order_ignores_success_replay() {
		let mut o = order("0x1");
		o.status = OrderStatus::Completed;
		let outcome = success("Dg7", vec![executed_event(&o, 990)], t0());
		let transition = reconcile(&o, execute(), &outcome, t0(), MAX_RETRY);
		assert_eq!(transition.kind, TransitionKind::Unchanged);
		assert!(transition.fills.is_empty());
	}
}
