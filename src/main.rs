//! covid-lookup: a COVID dataset lookup server
//!
//! Loads a CSV dataset into memory at startup and answers region and date
//! queries over TCP or a Unix domain socket using a small text protocol:
//!
//! ```text
//! > nc localhost 4040
//! > {"query": {"region": "Sindh"}}
//! > {"query": {"date": "4/4/2020"}}
//! ```
//!
//! Features:
//! - Case-insensitive exact and substring matching on region and date
//! - One task per connection over a shared read-only dataset
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod csv;
mod dataset;
mod protocol;
mod server;

use config::Config;
use dataset::Dataset;
use server::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        network = %config.network,
        endpoint = %config.endpoint,
        dataset = %config.dataset.display(),
        "Starting covid-lookup server"
    );

    let dataset = Dataset::load(&config.dataset)?;
    if dataset.is_empty() {
        warn!("Dataset has no records, every query will find nothing");
    }
    let server = Server::bind(&config, dataset).await?;
    server.run(tokio::signal::ctrl_c()).await;

    Ok(())
}
