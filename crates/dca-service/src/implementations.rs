//! Registry of the concrete backends the binary ships with.

use dca_account::implementations::local;
use dca_config::Config;
use dca_core::KeeperBuilder;
use dca_delivery::implementations::sui;
use dca_discovery::implementations::sentio;
use dca_storage::implementations::{file, memory};

/// A builder with every bundled implementation registered.
pub fn builder(config: Config) -> KeeperBuilder {
	KeeperBuilder::new(config)
		.with_storage_factory("memory", memory::create_storage)
		.with_storage_factory("file", file::create_storage)
		.with_account_factory("local", local::create_account)
		.with_executor_factory("sui", sui::create_executor)
		.with_source_factory("sentio", sentio::create_source)
}
