//! Classification of chain execution errors.
//!
//! The node reports Move aborts as a debug-formatted string such as
//!
//! ```text
//! MoveAbort(MoveLocation { module: ModuleId { address: 0x..., name: Identifier("dca") },
//!     function: 7, instruction: 21, function_name: Some("repay_order") }, 101) in command 4
//! ```
//!
//! From that we keep the aborting function and the abort code.

use dca_types::FailureReason;
use regex::Regex;
use std::sync::LazyLock;

static FUNCTION_NAME: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"function_name: Some\("([^"]+)"\)"#).ok());
static ABORT_CODE: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"MoveAbort.*\{.*, (\d+)\)").ok());

/// Function and abort code extracted from an execution error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveAbort {
	pub function: Option<String>,
	pub code: Option<u32>,
}

pub fn parse_move_abort(error: &str) -> MoveAbort {
	let function = FUNCTION_NAME
		.as_ref()
		.and_then(|re| re.captures(error))
		.map(|cap| cap[1].to_string());

	let code = ABORT_CODE
		.as_ref()
		.and_then(|re| re.captures(error))
		.and_then(|cap| cap[1].parse::<u32>().ok());

	MoveAbort { function, code }
}

/// Turns an execution error string into a failure reason.
///
/// Errors that are not Move aborts (insufficient gas, object version
/// conflicts and the like) carry no code and are treated as transient.
pub fn classify_execution_error(error: &str) -> FailureReason {
	let abort = parse_move_abort(error);
	match abort.code {
		Some(code) => FailureReason::abort(abort.function, code, error),
		None => FailureReason {
			code: None,
			function: abort.function,
			message: error.to_string(),
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dca_types::ErrorCode;

	const SLIPPAGE: &str = r#"MoveAbort(MoveLocation { module: ModuleId { address: 89b1, name: Identifier("dca") }, function: 7, instruction: 21, function_name: Some("repay_order") }, 101) in command 4"#;

	#[test]
	fn test_parses_function_and_code() {
		let abort = parse_move_abort(SLIPPAGE);
		assert_eq!(abort.function.as_deref(), Some("repay_order"));
		assert_eq!(abort.code, Some(101));

		let reason = classify_execution_error(SLIPPAGE);
		assert_eq!(reason.code, Some(ErrorCode::InsufficientRepaidAmount));
	}

	#[test]
	fn test_patterns_compile_once_and_stay_usable() {
		assert!(FUNCTION_NAME.is_some());
		assert!(ABORT_CODE.is_some());
		for _ in 0..3 {
			assert_eq!(parse_move_abort(SLIPPAGE).code, Some(101));
		}
		assert_eq!(
			parse_move_abort("InsufficientGas"),
			MoveAbort {
				function: None,
				code: None
			}
		);
	}

	#[test]
	fn test_unknown_abort_code_is_preserved() {
		let error = r#"MoveAbort(MoveLocation { module: ModuleId { address: 2, name: Identifier("coin") }, function: 1, instruction: 9, function_name: Some("split") }, 2) in command 0"#;
		let reason = classify_execution_error(error);
		assert_eq!(reason.function.as_deref(), Some("split"));
		assert_eq!(reason.code, Some(ErrorCode::Abort(2)));

		let error = r#"MoveAbort(MoveLocation { module: ModuleId { address: 2, name: Identifier("x") }, function: 1, instruction: 9, function_name: None }, 777) in command 0"#;
		assert_eq!(classify_execution_error(error).code, Some(ErrorCode::Abort(777)));
	}

	#[test]
	fn test_non_abort_errors_are_transient() {
		let reason = classify_execution_error("InsufficientGas");
		assert_eq!(reason.code, None);
		assert_eq!(reason.function, None);
	}
}
