//! Core of the DCA keeper.
//!
//! The engine ticks on a fixed interval. Every tick selects the orders that
//! are due for a tranche or for close, hands them to the executor through a
//! bounded dispatcher and reconciles each outcome into the order store.
//! [`KeeperBuilder`] wires the engine and the optional ingestion service from
//! configuration and registered implementations.

pub mod builder;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod selector;

#[cfg(test)]
mod testing;

pub use builder::{Keeper, KeeperBuilder};
pub use engine::{ActionReport, KeeperEngine, KeeperSettings, OrderDetails, TickReport};
pub use error::KeeperError;
pub use reconciler::TransitionKind;
