//! Binary crate for the `multiweather` HTTP server.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Wiring config into one shared aggregator instance
//! - Serving `GET /weather/{city}` over HTTP

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use multiweather_core::{Aggregator, Config};
use tracing_subscriber::EnvFilter;

mod http;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "multiweather-server", version, about = "Aggregating weather server")]
struct Args {
    /// Path to the TOML config file; defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let aggregator = Arc::new(Aggregator::from_config(&config)?);
    tracing::info!(
        providers = ?aggregator.provider_ids(),
        listen = %args.listen,
        "starting multiweather server"
    );

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, http::router(aggregator)).await?;

    Ok(())
}
