use canvas_relay::config::RelayConfig;
use dotenvy::dotenv;
use tracing::{error, warn};
use tracing_subscriber::filter::EnvFilter;

use crate::cli::args::Args;

mod cli;

/// Entry point of the relay.
///
/// Loads `.env` and the config file, sets up logging from `RUST_LOG` (or the
/// configured level) and runs the selected command.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();

    let loaded = RelayConfig::load();
    let default_level = match &loaded {
        Ok(cfg) => cfg.rust_log.clone(),
        Err(_) => RelayConfig::default().rust_log,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cfg = loaded.unwrap_or_else(|e| {
        warn!("could not load config file, using defaults: {e}");
        RelayConfig::default()
    });

    let args = Args::new();
    if let Err(e) = args.run(&cfg).await {
        error!("{e}");
    }

    Ok(())
}
