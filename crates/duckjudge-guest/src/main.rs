//! Agent inside a duckjudge sandbox.
//!
//! Listens on TCP and answers one EOT-framed request per connection:
//! file hash health checks, javac compilations and java runs.

mod agent;
mod error;
mod frame;

use agent::{error_reply, AgentSettings, GuestAgent};
use anyhow::Result;
use clap::Parser;
use duckjudge_types::GuestRequest;
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about = "duckjudge guest agent - compiles and runs Java inside a sandbox")]
struct Cli {
    #[clap(long, default_value = "0.0.0.0:5000")]
    listen: SocketAddr,

    /// Scratch space for sources and class files.
    #[clap(long, default_value = "/app/work")]
    work_dir: PathBuf,

    /// Library jars put on every classpath.
    #[clap(long = "lib", default_value = "/app/lib/gson-2.13.1.jar")]
    libs: Vec<PathBuf>,

    #[clap(long, default_value = "javac")]
    javac: String,

    #[clap(long, default_value = "java")]
    java: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(log_level_filter).init();

    let agent = Arc::new(GuestAgent::new(AgentSettings {
        work_dir: cli.work_dir,
        classpath: cli.libs,
        javac: vec![cli.javac],
        java: vec![cli.java],
    }));

    let listener = TcpListener::bind(cli.listen).await?;
    log::info!("Guest agent listening on {}", cli.listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let agent = agent.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(&agent, stream).await {
                        log::warn!("connection from {} failed: {}", peer, e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }
    Ok(())
}

/// Reads one request frame and writes its reply.
async fn serve_connection<S>(agent: &GuestAgent, stream: S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let payload = frame::read_frame(&mut stream).await?;
    let reply = match serde_json::from_slice::<GuestRequest>(&payload) {
        Ok(request) => {
            log::debug!("handling {} request", request.kind());
            agent.handle(request).await
        }
        Err(e) => error_reply(&format!("JSON parse error: {}", e)),
    };
    frame::write_frame(stream.get_mut(), &serde_json::to_vec(&reply)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckjudge_types::GUEST_EOT;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn exchange(agent: &GuestAgent, request: &[u8]) -> Value {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let serve = tokio::spawn({
            let agent = agent.clone();
            async move { serve_connection(&agent, server).await }
        });

        let (mut read, mut write) = tokio::io::split(client);
        write.write_all(request).await.unwrap();
        write.write_all(&[GUEST_EOT]).await.unwrap();

        let mut reply = Vec::new();
        read.read_to_end(&mut reply).await.unwrap();
        serve.await.unwrap().unwrap();
        assert_eq!(reply.pop(), Some(GUEST_EOT));
        serde_json::from_slice(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_health_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gson.jar");
        std::fs::write(&file, "").unwrap();
        let agent = GuestAgent::new(AgentSettings::default());

        let request = serde_json::json!({ "$type": "health", "filesToCheck": [file] });
        let reply = exchange(&agent, request.to_string().as_bytes()).await;
        assert_eq!(reply["$type"], "ok");
        assert_eq!(
            reply["body"][file.display().to_string()],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_garbage_gets_an_err_reply() {
        let agent = GuestAgent::new(AgentSettings::default());
        let reply = exchange(&agent, b"{not json").await;
        assert_eq!(reply["$type"], "err");
        assert!(reply["body"].as_str().unwrap().starts_with("JSON parse error"));
    }
}
