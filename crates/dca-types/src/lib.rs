//! Shared types for the DCA keeper.
//!
//! Every other crate in the workspace speaks in these types: the order row
//! persisted by the store, the outcome returned by a remote execution, the
//! domain events emitted on chain and the audit trail written per action.

pub mod asset;
pub mod events;
pub mod execution_log;
pub mod order;
pub mod outcome;
pub mod serde_helpers;
pub mod validation;

pub use asset::*;
pub use events::*;
pub use execution_log::*;
pub use order::*;
pub use outcome::*;
pub use validation::*;
