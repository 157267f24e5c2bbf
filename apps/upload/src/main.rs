//! Ferry upload client entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Upload files or directories to a ferry server, resuming where a
/// previous run stopped.
#[derive(Debug, Parser)]
#[command(name = "ferry-upload", version, about)]
struct Args {
    /// Server host.
    #[arg(long)]
    host: Option<String>,

    /// Server port.
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chunk size in bytes.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Resume state file.
    #[arg(long)]
    resume_file: Option<String>,

    /// Files or directories to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
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
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(resume_file) = args.resume_file {
        config.resume_file = resume_file;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.addr(),
        chunk_size = config.chunk_size,
        "starting ferry upload"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(config, args.paths))?;
    summary.print();

    if summary.unfinished() > 0 {
        anyhow::bail!("{} of {} files did not finish", summary.unfinished(), summary.total());
    }
    Ok(())
}
