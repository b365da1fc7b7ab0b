//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dca-keeper")]
#[command(about = "Keeper for DCA escrow orders", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
	/// Path to configuration file
	#[arg(
		short,
		long,
		global = true,
		value_name = "FILE",
		env = "DCA_CONFIG",
		default_value = "config/keeper.toml"
	)]
	pub config: PathBuf,

	/// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
	#[arg(long, global = true, env = "DCA_LOG_LEVEL", default_value = "info")]
	pub log_level: String,

	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
	/// Tick on the configured interval until interrupted
	Run,
	/// Run a single tick and print its report
	Tick,
	/// Execute the next tranche of an order now
	Execute {
		#[arg(value_name = "ESCROW_ID")]
		escrow_id: String,
	},
	/// Close an order now and withdraw its balances
	Close {
		#[arg(value_name = "ESCROW_ID")]
		escrow_id: String,
	},
	/// Return a failed order to scheduling
	Reset {
		#[arg(value_name = "ESCROW_ID")]
		escrow_id: String,
	},
	/// Show one order in detail, or list orders
	Status {
		#[arg(value_name = "ESCROW_ID")]
		escrow_id: Option<String>,
		/// List completed and failed orders too
		#[arg(long)]
		all: bool,
	},
	/// Pull new order events from the configured sources once
	Sync,
	/// Validate the configuration file
	Validate,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_run_is_the_default() {
		let cli = Cli::try_parse_from(["dca-keeper"]).unwrap();
		assert_eq!(cli.command, None);
		assert_eq!(cli.log_level, "info");
	}

	#[test]
	fn test_global_flags_after_subcommand() {
		let cli = Cli::try_parse_from([
			"dca-keeper",
			"execute",
			"0xabc",
			"--config",
			"other.toml",
			"--log-level",
			"debug",
		])
		.unwrap();
		assert_eq!(
			cli.command,
			Some(Command::Execute {
				escrow_id: "0xabc".into()
			})
		);
		assert_eq!(cli.config, PathBuf::from("other.toml"));
		assert_eq!(cli.log_level, "debug");
	}

	#[test]
	fn test_status_flags() {
		let cli = Cli::try_parse_from(["dca-keeper", "status", "--all"]).unwrap();
		assert_eq!(
			cli.command,
			Some(Command::Status {
				escrow_id: None,
				all: true
			})
		);
		assert!(Cli::try_parse_from(["dca-keeper", "reset"]).is_err());
	}
}
