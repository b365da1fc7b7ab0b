//! Actions the keeper can take on an order and the outcome of attempting one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::events::DcaEvent;

/// The on-chain action requested for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
	/// Swap one tranche; when `is_last_order` the executor also finalizes the escrow.
	Execute { is_last_order: bool },
	/// Finalize the escrow and withdraw its balances.
	Close,
}

impl Action {
	pub fn name(&self) -> &'static str {
		match self {
			Action::Execute { .. } => "execute",
			Action::Close => "close",
		}
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Numeric outcome taxonomy recorded in the execution log.
///
/// Codes 101..=114 are abort codes raised by the DCA Move package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum ErrorCode {
	Success,
	FailedFetch,
	NotFound,
	Timeout,
	UnsupportedAsset,
	Panicked,
	UnknownError,
	InsufficientRepaidAmount,
	InvalidPrice,
	NotOwner,
	AlreadyClaimed,
	MinimumFrequency,
	ZeroValue,
	InvalidAmount,
	WrongEscrowId,
	MaxPrice,
	AllOrdersFilled,
	MinimumOrders,
	EmptyDeposit,
	MaxFeeRate,
	InvalidWindow,
	/// An abort code this build does not know about.
	Abort(u32),
}

impl ErrorCode {
	pub fn code(&self) -> u32 {
		match self {
			ErrorCode::Success => 0,
			ErrorCode::FailedFetch => 1,
			ErrorCode::NotFound => 2,
			ErrorCode::Timeout => 3,
			ErrorCode::UnsupportedAsset => 4,
			ErrorCode::Panicked => 5,
			ErrorCode::UnknownError => 99,
			ErrorCode::InsufficientRepaidAmount => 101,
			ErrorCode::InvalidPrice => 102,
			ErrorCode::NotOwner => 103,
			ErrorCode::AlreadyClaimed => 104,
			ErrorCode::MinimumFrequency => 105,
			ErrorCode::ZeroValue => 106,
			ErrorCode::InvalidAmount => 107,
			ErrorCode::WrongEscrowId => 108,
			ErrorCode::MaxPrice => 109,
			ErrorCode::AllOrdersFilled => 110,
			ErrorCode::MinimumOrders => 111,
			ErrorCode::EmptyDeposit => 112,
			ErrorCode::MaxFeeRate => 113,
			ErrorCode::InvalidWindow => 114,
			ErrorCode::Abort(code) => *code,
		}
	}

	/// Maps a Move abort code. Only the DCA package range is named; anything
	/// else, including low codes raised by framework modules, stays `Abort(n)`.
	pub fn from_abort(code: u32) -> Self {
		match code {
			101..=114 => ErrorCode::from(code),
			other => ErrorCode::Abort(other),
		}
	}

	/// Whether the code was raised by the Move package rather than locally.
	pub fn is_abort(&self) -> bool {
		matches!(self, ErrorCode::Abort(_)) || self.code() > 100
	}
}

impl From<u32> for ErrorCode {
	fn from(code: u32) -> Self {
		match code {
			0 => ErrorCode::Success,
			1 => ErrorCode::FailedFetch,
			2 => ErrorCode::NotFound,
			3 => ErrorCode::Timeout,
			4 => ErrorCode::UnsupportedAsset,
			5 => ErrorCode::Panicked,
			99 => ErrorCode::UnknownError,
			101 => ErrorCode::InsufficientRepaidAmount,
			102 => ErrorCode::InvalidPrice,
			103 => ErrorCode::NotOwner,
			104 => ErrorCode::AlreadyClaimed,
			105 => ErrorCode::MinimumFrequency,
			106 => ErrorCode::ZeroValue,
			107 => ErrorCode::InvalidAmount,
			108 => ErrorCode::WrongEscrowId,
			109 => ErrorCode::MaxPrice,
			110 => ErrorCode::AllOrdersFilled,
			111 => ErrorCode::MinimumOrders,
			112 => ErrorCode::EmptyDeposit,
			113 => ErrorCode::MaxFeeRate,
			114 => ErrorCode::InvalidWindow,
			other => ErrorCode::Abort(other),
		}
	}
}

impl From<ErrorCode> for u32 {
	fn from(code: ErrorCode) -> Self {
		code.code()
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}({})", self, self.code())
	}
}

/// Result of a committed on-chain action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
	/// DCA events emitted by the transaction.
	pub events: Vec<DcaEvent>,
	pub digest: String,
	/// Checkpoint (block height) the transaction was included in.
	pub checkpoint: Option<u64>,
	pub timestamp: DateTime<Utc>,
}

/// Why an execution attempt did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
	/// Classified code; `None` for transient faults with no chain error code.
	pub code: Option<ErrorCode>,
	/// Move function that aborted, when the chain reported one.
	pub function: Option<String>,
	pub message: String,
}

impl FailureReason {
	pub fn transient(message: impl Into<String>) -> Self {
		Self {
			code: None,
			function: None,
			message: message.into(),
		}
	}

	pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code: Some(code),
			function: None,
			message: message.into(),
		}
	}

	pub fn abort(function: Option<String>, code: u32, message: impl Into<String>) -> Self {
		Self {
			code: Some(ErrorCode::from_abort(code)),
			function,
			message: message.into(),
		}
	}
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (&self.code, &self.function) {
			(Some(code), Some(function)) => write!(f, "{} in {}: {}", code, function, self.message),
			(Some(code), None) => write!(f, "{}: {}", code, self.message),
			_ => f.write_str(&self.message),
		}
	}
}

/// Tagged result of one remote execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
	Success(ExecutionReceipt),
	/// The escrow object no longer exists on chain.
	NotFound,
	Failure(FailureReason),
}

impl Outcome {
	/// Code written to the execution log for this outcome.
	pub fn error_code(&self) -> ErrorCode {
		match self {
			Outcome::Success(_) => ErrorCode::Success,
			Outcome::NotFound => ErrorCode::NotFound,
			Outcome::Failure(reason) => reason.code.unwrap_or(ErrorCode::UnknownError),
		}
	}

	pub fn digest(&self) -> Option<&str> {
		match self {
			Outcome::Success(receipt) => Some(&receipt.digest),
			_ => None,
		}
	}

	pub fn is_success(&self) -> bool {
		matches!(self, Outcome::Success(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_code_round_trips_known_and_unknown() {
		assert_eq!(ErrorCode::from(101), ErrorCode::InsufficientRepaidAmount);
		assert_eq!(ErrorCode::from(104).code(), 104);
		assert_eq!(ErrorCode::from(250), ErrorCode::Abort(250));
		assert!(ErrorCode::AllOrdersFilled.is_abort());
		assert!(!ErrorCode::Timeout.is_abort());
		assert_eq!(ErrorCode::from_abort(2), ErrorCode::Abort(2));
		assert!(ErrorCode::from_abort(2).is_abort());
		assert_eq!(ErrorCode::from_abort(110), ErrorCode::AllOrdersFilled);
	}

	#[test]
	fn test_outcome_codes() {
		assert_eq!(Outcome::NotFound.error_code().code(), 2);
		let transient = Outcome::Failure(FailureReason::transient("rpc unavailable"));
		assert_eq!(transient.error_code(), ErrorCode::UnknownError);
		let slippage = Outcome::Failure(FailureReason::abort(Some("repay_order".into()), 101, "abort"));
		assert_eq!(slippage.error_code(), ErrorCode::InsufficientRepaidAmount);
		assert!(slippage.digest().is_none());
	}
}
