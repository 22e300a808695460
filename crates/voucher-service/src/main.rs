//! Main entry point for the voucher issuer service.
//!
//! Issues signed, single-use vouchers over HTTP, records their consumption
//! and reaps spent records in the background. Ledger and signing backends
//! are chosen by name in the configuration file.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use voucher_config::Config;

mod apis;
mod factory_registry;
mod server;

/// Command-line arguments for the voucher issuer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "VOUCHER_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the voucher issuer.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the voucher engine from the configured implementations
/// 5. Runs the reaper and the API server until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started voucher issuer");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.issuer.id);

	let engine = factory_registry::build_engine_from_config(config.clone()).await?;
	engine.initialize().await?;
	let engine = Arc::new(engine);

	let api_config = config.api_or_default();
	if api_config.enabled {
		let api_engine = Arc::clone(&engine);

		// Run the reaper and the API server concurrently
		tokio::select! {
			result = engine.run() => {
				tracing::info!("Engine finished");
				result?;
			}
			result = server::start_server(api_config, api_engine) => {
				tracing::info!("API server finished");
				result?;
			}
		}
	} else {
		tracing::info!("API disabled, running reaper only");
		engine.run().await?;
	}

	engine.shutdown().await?;
	tracing::info!("Stopped voucher issuer");
	Ok(())
}
