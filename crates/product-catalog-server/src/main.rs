#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::lifecycle::{LifecycleError, Listening, ServeOptions};
use server::store::mongo::MongoStore;
use server::telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let result = run(&config).await;
    providers.shutdown();
    conclude(result)
}

/// Failures are not logged here; `anyhow` reports them once on the way out
/// of `main`.
fn conclude(result: Result<(), LifecycleError>) -> anyhow::Result<()> {
    result?;
    tracing::info!("Service shut down successfully");
    Ok(())
}

async fn run(config: &ServerConfig) -> Result<(), LifecycleError> {
    let listening = Listening::bind(&config.server_addr).await?;
    tracing::debug!(addr = %listening.local_addr(), "Connecting to store");
    let serving = listening
        .connect(|| MongoStore::connect(&config.store, config.store_timeout))
        .await?;
    tracing::debug!(addr = %serving.local_addr(), "Store connected, registering handlers");
    serving
        .run(ServeOptions::from(config), shutdown_signal())
        .await
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting product catalog on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting product catalog on {} backed by {}/{}",
            config.server_addr,
            config.store.database,
            config.store.collection
        );
    }
}

/// Resolves on the first Ctrl+C. No other signal is handled.
async fn shutdown_signal() {
    signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("Received Ctrl+C signal");
}
