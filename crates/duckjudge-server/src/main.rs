//! Executor service binary: loads the configuration, starts the pipeline
//! against the warden sidecar and serves HTTP until shut down.

use anyhow::Result;
use clap::Parser;
use duckjudge_core::config::{ConfigLoader, ExecutorConfig};
use duckjudge_server::pipeline::{load_exercises, sandbox_stack};
use duckjudge_server::{shutdown_signal, start_pipeline, ExecutorServer, ServerConfig};
use log::LevelFilter;
use std::path::Path;

#[derive(Parser, Debug)]
#[clap(author, version, about = "duckjudge executor - compile, run and grade learner submissions")]
struct Cli {
    #[clap(long, short, default_value = "duckjudge.yaml", help = "Path to the executor configuration")]
    config: String,

    #[clap(long, default_value = "127.0.0.1:3050")]
    bind_addr: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(log_level_filter).init();

    let config = load(&cli.config).await?;
    let server_config = ServerConfig::new().with_bind_addr_str(&cli.bind_addr)?;

    let exercises = load_exercises(&config).await?;
    let (backend, builder) = sandbox_stack(&config);
    let pipeline = start_pipeline(&config, backend, builder, exercises).await?;
    log::info!("Executor pipeline started against warden {}", config.warden.base_url);

    let server = ExecutorServer::with_config(pipeline.service.clone(), server_config);
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    log::info!("Stopping executor pipeline...");
    pipeline.stop().await;
    served?;
    Ok(())
}

async fn load(path: &str) -> Result<ExecutorConfig> {
    if Path::new(path).exists() {
        log::info!("Loading configuration from file: {}", path);
        Ok(ConfigLoader::from_file(path).await?)
    } else {
        log::warn!("Configuration file {} not found, using defaults", path);
        Ok(ConfigLoader::from_str("")?)
    }
}
