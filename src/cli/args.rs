use canvas_relay::config::RelayConfig;
use canvas_relay::relay;
use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Relay server for shared-canvas rooms")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay server (the default)
    Serve {
        /// Port to run the relay server on
        #[arg(short, long)]
        port: Option<u16>,
        /// The listen address to run the relay server on
        #[arg(short, long)]
        listen_address: Option<String>,
    },
    /// Work with your configuration
    Config {
        /// Show path to config file
        #[arg(short, long)]
        path: bool,

        /// View configured options
        #[arg(short, long)]
        show: bool,
    },
}

impl Default for Args {
    fn default() -> Self {
        Self::new()
    }
}

impl Args {
    pub fn new() -> Self {
        Self::parse()
    }

    pub async fn run(&self, cfg: &RelayConfig) -> anyhow::Result<()> {
        debug!("args: {:#?}", self);
        match &self.command {
            Some(Commands::Serve {
                port,
                listen_address,
            }) => serve(cfg, *port, listen_address.as_deref()).await,
            Some(Commands::Config { path, show }) => {
                if *path {
                    println!("{}", RelayConfig::path()?.display());
                }
                if *show {
                    println!("{cfg:#?}");
                }
                Ok(())
            }
            None => serve(cfg, None, None).await,
        }
    }
}

async fn serve(cfg: &RelayConfig, port: Option<u16>, listen_address: Option<&str>) -> anyhow::Result<()> {
    let address = listen_address.unwrap_or(&cfg.app_host);
    let port = port.unwrap_or(cfg.app_port);
    debug!("Running in {} mode", cfg.app_environment);
    relay::server::start_ws(port, address, cfg.settings()).await
}
