//! HTTP query server entry point.
//!
//! Loads the persisted artifacts once and serves the read-only JSON API
//! until interrupted.
//!
//! ```bash
//! api_server --config topics.toml --port 8080
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use paper_topics::{config::PipelineConfig, query::Catalog, server, storage::json::JsonArtifactStore};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Read-only HTTP API over the clustered knowledge base
#[derive(Parser, Debug)]
#[command(name = "api_server", version, about = "Serve clusters, articles and association rules over HTTP")]
struct Args {
    /// TOML configuration file
    #[arg(long, short, value_name = "FILE", env = "PAPER_TOPICS_CONFIG")]
    config: Option<PathBuf>,

    /// Artifact directory (overrides paths.data_dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Bind address (overrides server.host)
    #[arg(long, value_name = "ADDR")]
    host: Option<IpAddr>,

    /// Listen port (overrides server.port)
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Logging verbosity level (overrides logging.level)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PipelineConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    if let Some(dir) = args.data_dir.clone() {
        config.paths.data_dir = dir;
    }

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level).context("Failed to initialize logging")?;

    let store = JsonArtifactStore::open(config.paths.data_dir.clone())
        .await
        .with_context(|| format!("Failed to open artifact directory {:?}", config.paths.data_dir))?;
    let catalog = Catalog::load(&store)
        .await
        .context("Failed to load artifacts; run the pipeline first")?;
    info!(
        articles = catalog.article_count(),
        clusters = catalog.list_clusters().len(),
        "Catalog loaded"
    );

    let mut addr = config.server.socket_addr();
    if let Some(host) = args.host {
        addr = SocketAddr::new(host, addr.port());
    }
    if let Some(port) = args.port {
        addr.set_port(port);
    }

    server::serve(addr, Arc::new(catalog), shutdown_signal())
        .await
        .with_context(|| format!("Server on {} failed", addr))?;

    Ok(())
}
