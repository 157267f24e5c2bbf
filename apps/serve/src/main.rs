//! Ferry upload server entry point.

use std::path::PathBuf;

use clap::Parser;
use ferry_server::UploadServer;
use ferry_transfer::StagingStore;
use tracing_subscriber::EnvFilter;

mod config;

/// Receive resumable chunk uploads into a staging directory.
#[derive(Debug, Parser)]
#[command(name = "ferryd", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Staging root directory.
    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(staging_dir) = args.staging_dir {
        config.staging_dir = staging_dir;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ferryd");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.staging_dir)?;
    let staging = StagingStore::new(&config.staging_dir);
    let server = UploadServer::new(config.server_config(), staging);

    let shutdown = std::sync::Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
