//! Configuration for the DCA keeper.
//!
//! Configuration is read from a TOML file, `${VAR}` references are replaced
//! with environment values, `DCA_*` environment variables override selected
//! keys, and the result is checked before anything is built from it.

use thiserror::Error;

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}
