use anyhow::{bail, Context, Result};
use clap::Parser;
use dca_config::{Config, ConfigLoader};
use dca_core::{ActionReport, Keeper};
use dca_types::{DcaOrder, EscrowId, OrderFilter, Outcome};
use std::path::Path;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod implementations;
mod lock;

use cli::{Cli, Command};
use lock::LockFile;

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	let config = load_config(&cli.config).await?;

	match cli.command.unwrap_or(Command::Run) {
		Command::Run => run_keeper(config).await,
		Command::Tick => {
			let _lock = acquire_lock(&config)?;
			let keeper = build(config)?;
			let report = keeper.engine.tick().await;
			println!("{}", serde_json::to_string_pretty(&report)?);
			Ok(())
		}
		Command::Execute { escrow_id } => {
			let _lock = acquire_lock(&config)?;
			let keeper = build(config)?;
			let report = keeper
				.engine
				.execute_order(&EscrowId::new(escrow_id))
				.await
				.context("Execute failed")?;
			print_action(&report)
		}
		Command::Close { escrow_id } => {
			let _lock = acquire_lock(&config)?;
			let keeper = build(config)?;
			let report = keeper
				.engine
				.close_order(&EscrowId::new(escrow_id))
				.await
				.context("Close failed")?;
			print_action(&report)
		}
		Command::Reset { escrow_id } => {
			let _lock = acquire_lock(&config)?;
			let keeper = build(config)?;
			let order = keeper
				.engine
				.reset_order(&EscrowId::new(escrow_id))
				.await
				.context("Reset failed")?;
			println!("{}", serde_json::to_string_pretty(&order)?);
			Ok(())
		}
		Command::Status { escrow_id, all } => {
			let keeper = build(config)?;
			match escrow_id {
				Some(id) => {
					let details = keeper.engine.order_status(&EscrowId::new(id)).await?;
					println!("{}", serde_json::to_string_pretty(&details)?);
				}
				None => {
					let filter = if all {
						OrderFilter::All
					} else {
						OrderFilter::Active
					};
					let orders = keeper.engine.list_orders(filter).await?;
					for order in &orders {
						println!("{}", summary(order));
					}
					println!("{} order(s)", orders.len());
				}
			}
			Ok(())
		}
		Command::Sync => {
			let keeper = build(config)?;
			let Some(ingestion) = keeper.ingestion else {
				bail!("Discovery is disabled in the configuration");
			};
			let reports = ingestion.sync_once().await;
			println!("{}", serde_json::to_string_pretty(&reports)?);
			Ok(())
		}
		Command::Validate => {
			let name = config.keeper.name.clone();
			build(config)?;
			info!("Configuration is valid for {}", name);
			Ok(())
		}
	}
}

async fn load_config(path: &Path) -> Result<Config> {
	info!("Loading configuration from: {:?}", path);
	ConfigLoader::new()
		.with_file(path)
		.load()
		.await
		.context("Failed to load configuration")
}

fn build(config: Config) -> Result<Keeper> {
	implementations::builder(config)
		.build()
		.context("Failed to build keeper")
}

fn acquire_lock(config: &Config) -> Result<Option<LockFile>> {
	config
		.keeper
		.lock_file
		.as_deref()
		.map(LockFile::acquire)
		.transpose()
}

async fn run_keeper(config: Config) -> Result<()> {
	let _lock = acquire_lock(&config)?;
	info!("Starting {}", config.keeper.name);
	let keeper = build(config)?;

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		setup_shutdown_signal().await;
		info!("Shutdown signal received");
		let _ = shutdown_tx.send(true);
	});

	let ingestion = keeper.ingestion.map(|ingestion| {
		let shutdown = wait_for_shutdown(shutdown_rx.clone());
		tokio::spawn(async move { ingestion.run(shutdown).await })
	});

	keeper.engine.run(wait_for_shutdown(shutdown_rx)).await;

	if let Some(handle) = ingestion {
		if let Err(e) = handle.await {
			error!("Ingestion task failed: {}", e);
		}
	}

	info!("Keeper stopped");
	Ok(())
}

fn print_action(report: &ActionReport) -> Result<()> {
	let result = match &report.outcome {
		Outcome::Success(receipt) => format!("committed in {}", receipt.digest),
		Outcome::NotFound => "escrow no longer exists".to_string(),
		Outcome::Failure(reason) => format!("failed: {}", reason),
	};
	println!("{} {}: {} ({:?})", report.action, report.order.escrow_id, result, report.kind);
	println!("{}", summary(&report.order));
	Ok(())
}

fn summary(order: &DcaOrder) -> String {
	format!(
		"{} {} {}/{} remaining={} received={} retries={}",
		order.escrow_id,
		order.status,
		order.orders_executed,
		order.orders_total,
		order.base_remain,
		order.quote_received,
		order.retry_count
	)
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
	while !*rx.borrow_and_update() {
		if rx.changed().await.is_err() {
			break;
		}
	}
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
