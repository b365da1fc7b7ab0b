//! Append-only audit trail of keeper actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Action, ErrorCode, EscrowId, Outcome};

/// One row of the execution log. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
	pub escrow_id: EscrowId,
	pub action: Action,
	/// Transaction digest; only set when the action committed.
	pub digest: Option<String>,
	pub error_code: ErrorCode,
	/// Move function named in an abort, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function: Option<String>,
	pub checkpoint: Option<u64>,
	pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
	pub fn from_outcome(
		escrow_id: &EscrowId,
		action: Action,
		outcome: &Outcome,
		created_at: DateTime<Utc>,
	) -> Self {
		let (digest, checkpoint, function) = match outcome {
			Outcome::Success(receipt) => (Some(receipt.digest.clone()), receipt.checkpoint, None),
			Outcome::NotFound => (None, None, None),
			Outcome::Failure(reason) => (None, None, reason.function.clone()),
		};
		Self {
			escrow_id: escrow_id.clone(),
			action,
			digest,
			error_code: outcome.error_code(),
			function,
			checkpoint,
			created_at,
		}
	}
}
