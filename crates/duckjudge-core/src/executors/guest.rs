// src/executors/guest.rs
use duckjudge_types::{GuestRequest, GUEST_EOT};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

use crate::config::GuestConfig;
use crate::errors::ExecutorError;

/// Where an environment's guest agent listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestAddress {
    /// `host:port`
    Tcp(String),
    /// Host side of a vsock proxy, plus the guest port to connect to.
    Vsock { uds_path: PathBuf, port: u32 },
}

impl fmt::Display for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            GuestAddress::Vsock { uds_path, port } => write!(f, "vsock://{}:{}", uds_path.display(), port),
        }
    }
}

/// Reply frames larger than this are refused unless configured otherwise.
pub const DEFAULT_MAX_REPLY_BYTES: usize = 16 * 1024 * 1024;

/// Request/response client for guest agents.
///
/// Each query opens a fresh connection, writes one JSON document followed by
/// EOT and reads the reply up to the next EOT. Connection failures are retried
/// with exponential backoff; once a request has been written it is never
/// resent.
#[derive(Debug, Clone)]
pub struct GuestChannel {
    retry_count: u32,
    base_backoff: Duration,
    max_reply_bytes: usize,
}

impl GuestChannel {
    pub fn new(retry_count: u32, base_backoff: Duration) -> Self {
        Self {
            retry_count,
            base_backoff,
            max_reply_bytes: DEFAULT_MAX_REPLY_BYTES,
        }
    }

    pub fn from_config(config: &GuestConfig) -> Self {
        Self::new(config.retry_count, config.base_backoff()).with_max_reply_bytes(config.max_reply_bytes)
    }

    pub fn with_max_reply_bytes(mut self, max_reply_bytes: usize) -> Self {
        self.max_reply_bytes = max_reply_bytes;
        self
    }

    /// Backoff before retry `attempt` (0-based): `2^attempt * base`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << attempt.min(16))
    }

    pub async fn query<T: DeserializeOwned>(
        &self,
        address: &GuestAddress,
        request: &GuestRequest,
        timeout: Duration,
    ) -> Result<T, ExecutorError> {
        let mut payload = serde_json::to_vec(request)?;
        payload.push(GUEST_EOT);

        let raw = match tokio::time::timeout(timeout, self.exchange(address, &payload)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("{} query to {} timed out after {:?}", request.kind(), address, timeout);
                return Err(ExecutorError::TimedOut);
            }
        };

        serde_json::from_slice(&raw).map_err(|e| {
            ExecutorError::infrastructure(format!("malformed {} reply from guest: {}", request.kind(), e))
        })
    }

    async fn exchange(&self, address: &GuestAddress, payload: &[u8]) -> Result<Vec<u8>, ExecutorError> {
        let mut attempt = 0;
        loop {
            let outcome = match address {
                GuestAddress::Tcp(addr) => match TcpStream::connect(addr.as_str()).await {
                    Ok(stream) => Ok(round_trip(stream, payload, self.max_reply_bytes).await),
                    Err(e) => Err(e),
                },
                GuestAddress::Vsock { uds_path, port } => match connect_vsock(uds_path, *port).await {
                    Ok(stream) => Ok(round_trip(stream, payload, self.max_reply_bytes).await),
                    Err(e) => Err(e),
                },
            };

            match outcome {
                Ok(reply) => {
                    return reply.map_err(|e| match e.kind() {
                        io::ErrorKind::InvalidData => {
                            ExecutorError::infrastructure(format!("guest at {} sent a bad reply: {}", address, e))
                        }
                        _ => ExecutorError::infrastructure(format!(
                            "guest at {} dropped the connection: {}",
                            address, e
                        )),
                    })
                }
                Err(e) if attempt < self.retry_count => {
                    let delay = self.backoff(attempt);
                    debug!("connect to {} failed ({}), retrying in {:?}", address, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ExecutorError::infrastructure(format!(
                        "guest at {} unreachable after {} attempts: {}",
                        address,
                        attempt + 1,
                        e
                    )))
                }
            }
        }
    }
}

/// Opens the proxy socket and performs the `CONNECT <port>` handshake.
async fn connect_vsock(uds_path: &PathBuf, port: u32) -> io::Result<BufReader<UnixStream>> {
    let mut stream = BufReader::new(UnixStream::connect(uds_path).await?);
    stream.get_mut().write_all(format!("CONNECT {}\n", port).as_bytes()).await?;

    let mut ack = String::new();
    stream.read_line(&mut ack).await?;
    if !ack.starts_with("OK") {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("vsock handshake rejected: {}", ack.trim()),
        ));
    }
    Ok(stream)
}

async fn round_trip<S>(stream: S, payload: &[u8], max_reply_bytes: usize) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    stream.get_mut().write_all(payload).await?;
    stream.get_mut().flush().await?;
    read_frame(&mut stream, max_reply_bytes).await
}

/// Reads up to and excluding the next EOT. Frames longer than `limit`
/// bytes fail with `InvalidData` without buffering the rest.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut frame = Vec::new();
    (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(GUEST_EOT, &mut frame)
        .await?;
    if frame.last() == Some(&GUEST_EOT) {
        frame.pop();
        return Ok(frame);
    }
    if frame.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame exceeds {} bytes", limit),
        ));
    }
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "frame ended without EOT"))
}

/// Serializes `value` as one EOT-terminated frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(GUEST_EOT);
    writer.write_all(&bytes).await?;
    writer.flush().await
}
