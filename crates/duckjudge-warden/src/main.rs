//! Warden binary: serves the sandbox lifecycle API on a duckjudge host.

use anyhow::Result;
use clap::Parser;
use duckjudge_warden::{build_router, DockerRuntime, ScratchFilesystem, WardenSettings, WardenState, DEFAULT_PORT};
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about = "duckjudge warden - sandbox container and scratch filesystem sidecar")]
struct Cli {
    #[clap(long, short, default_value = "warden.yaml")]
    config: String,

    #[clap(long)]
    bind_addr: Option<String>,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(log_level_filter).init();

    let settings = if Path::new(&cli.config).exists() {
        log::info!("Loading warden settings from {}", cli.config);
        WardenSettings::from_file(&cli.config).await?
    } else {
        log::warn!("Settings file {} not found, using defaults", cli.config);
        WardenSettings::default()
    };

    let bind_addr: SocketAddr = match &cli.bind_addr {
        Some(addr) => addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", addr, e))?,
        None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
    };

    let runtime = DockerRuntime::new(settings.runtime.clone())?;
    let state = WardenState::new(Arc::new(runtime), ScratchFilesystem::new(&settings.scratch));
    let listener = TcpListener::bind(bind_addr).await?;
    log::info!("Warden listening on {} with image {}", bind_addr, settings.runtime.image);

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Removing remaining containers...");
    state.teardown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Received Ctrl+C, shutting down...");
}
