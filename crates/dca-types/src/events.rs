//! Domain events emitted by the DCA package.
//!
//! Events are identified by their Move type tag
//! (`<package>::event::OrderExecuted`, possibly followed by type arguments)
//! and decoded from the JSON payload the node returns for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::EscrowId;
use crate::serde_helpers::{deserialize_u32_string, deserialize_u64_string, serialize_u64_string};

pub const ORDER_CREATED_EVENT: &str = "event::OrderCreated";
pub const ORDER_EXECUTED_EVENT: &str = "event::OrderExecuted";
pub const ORDER_CLOSED_EVENT: &str = "event::OrderClosed";

/// Emitted when an escrow is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
	pub owner: String,
	pub escrow: EscrowId,
	pub input_type: String,
	pub output_type: String,
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub amount: u64,
	#[serde(deserialize_with = "deserialize_u32_string")]
	pub orders: u32,
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub frequency: u64,
}

/// Emitted when one tranche is swapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderExecutedEvent {
	pub owner: String,
	pub escrow: EscrowId,
	/// Output amount paid out for this tranche.
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub withdrawn_y: u64,
	/// Input balance left in the escrow after the tranche.
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub balance_x: u64,
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub balance_y: u64,
	/// Input amount spent by this tranche.
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub spent_x: u64,
	/// Tranche count reported by the contract after this execution.
	#[serde(deserialize_with = "deserialize_u32_string")]
	pub executed_order: u32,
}

/// Emitted when an escrow is finalized and its balances withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClosedEvent {
	pub escrow: EscrowId,
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub withdrawn_x: u64,
	#[serde(
		deserialize_with = "deserialize_u64_string",
		serialize_with = "serialize_u64_string"
	)]
	pub withdrawn_y: u64,
}

/// A decoded DCA event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DcaEvent {
	OrderCreated(OrderCreatedEvent),
	OrderExecuted(OrderExecutedEvent),
	OrderClosed(OrderClosedEvent),
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
	#[error("Malformed {kind} payload: {source}")]
	Payload {
		kind: &'static str,
		#[source]
		source: serde_json::Error,
	},
}

impl DcaEvent {
	/// Decodes a raw chain event.
	///
	/// Returns `Ok(None)` for events that belong to another package or that
	/// the keeper does not track.
	pub fn from_chain_event(
		package_id: &str,
		type_tag: &str,
		payload: &serde_json::Value,
	) -> Result<Option<Self>, EventDecodeError> {
		let Some(rest) = type_tag
			.strip_prefix(package_id)
			.and_then(|r| r.strip_prefix("::"))
		else {
			return Ok(None);
		};

		fn decode<T: for<'de> Deserialize<'de>>(
			kind: &'static str,
			payload: &serde_json::Value,
		) -> Result<T, EventDecodeError> {
			T::deserialize(payload).map_err(|source| EventDecodeError::Payload { kind, source })
		}

		if rest.starts_with(ORDER_EXECUTED_EVENT) {
			Ok(Some(DcaEvent::OrderExecuted(decode("OrderExecuted", payload)?)))
		} else if rest.starts_with(ORDER_CLOSED_EVENT) {
			Ok(Some(DcaEvent::OrderClosed(decode("OrderClosed", payload)?)))
		} else if rest.starts_with(ORDER_CREATED_EVENT) {
			Ok(Some(DcaEvent::OrderCreated(decode("OrderCreated", payload)?)))
		} else {
			Ok(None)
		}
	}

	pub fn escrow(&self) -> &EscrowId {
		match self {
			DcaEvent::OrderCreated(e) => &e.escrow,
			DcaEvent::OrderExecuted(e) => &e.escrow,
			DcaEvent::OrderClosed(e) => &e.escrow,
		}
	}
}

/// Per-tranche fill record, keyed by transaction digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheFill {
	pub escrow_id: EscrowId,
	pub digest: String,
	pub in_amount: u64,
	pub out_amount: u64,
	pub tranche: u32,
	pub checkpoint: Option<u64>,
	pub timestamp: DateTime<Utc>,
}

impl TrancheFill {
	pub fn from_event(
		event: &OrderExecutedEvent,
		digest: &str,
		checkpoint: Option<u64>,
		timestamp: DateTime<Utc>,
	) -> Self {
		Self {
			escrow_id: event.escrow.clone(),
			digest: digest.to_string(),
			in_amount: event.spent_x,
			out_amount: event.withdrawn_y,
			tranche: event.executed_order,
			checkpoint,
			timestamp,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	const PKG: &str = "0xdca";

	#[test]
	fn test_decode_executed_event() {
		let payload = json!({
			"owner": "0xowner",
			"escrow": "0xe1",
			"withdrawn_y": "995",
			"balance_x": "2000",
			"balance_y": "0",
			"spent_x": "1000",
			"executed_order": 1
		});
		let event = DcaEvent::from_chain_event(
			PKG,
			"0xdca::event::OrderExecuted<0x2::sui::SUI, 0xdba3::usdc::USDC>",
			&payload,
		)
		.unwrap()
		.unwrap();

		match event {
			DcaEvent::OrderExecuted(e) => {
				assert_eq!(e.escrow, EscrowId::from("0xe1"));
				assert_eq!(e.withdrawn_y, 995);
				assert_eq!(e.balance_x, 2_000);
				assert_eq!(e.executed_order, 1);
			}
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[test]
	fn test_foreign_package_is_ignored() {
		let payload = json!({ "escrow": "0xe1", "withdrawn_x": "1", "withdrawn_y": "2" });
		let event =
			DcaEvent::from_chain_event(PKG, "0xother::event::OrderClosed", &payload).unwrap();
		assert!(event.is_none());

		let untracked = DcaEvent::from_chain_event(PKG, "0xdca::event::FeeClaimed", &payload).unwrap();
		assert!(untracked.is_none());
	}

	#[test]
	fn test_malformed_payload_is_an_error() {
		let payload = json!({ "escrow": "0xe1", "withdrawn_x": "-1", "withdrawn_y": "2" });
		let res = DcaEvent::from_chain_event(PKG, "0xdca::event::OrderClosed", &payload);
		assert!(matches!(res, Err(EventDecodeError::Payload { kind: "OrderClosed", .. })));
	}
}
