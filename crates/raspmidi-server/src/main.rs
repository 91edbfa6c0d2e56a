//! RaspMIDI server binary.

use std::path::PathBuf;

use clap::Parser;
use raspmidi_server::{BackendKind, Result, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "RaspMIDI patch and device server")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides the config file and RASPMIDI_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides the config file and RASPMIDI_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding patches.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// MIDI backend
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().ok();

    raspmidi_server::run(config).await
}
