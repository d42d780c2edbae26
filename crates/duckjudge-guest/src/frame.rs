//! EOT-delimited JSON frames.

use duckjudge_types::GUEST_EOT;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one request; class files of a large submission fit easily.
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Reads up to and excluding the next EOT.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut frame = Vec::new();
    let mut limited = reader.take(MAX_FRAME_BYTES);
    limited.read_until(GUEST_EOT, &mut frame).await?;
    if frame.last() != Some(&GUEST_EOT) {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "frame ended without EOT"));
    }
    frame.pop();
    Ok(frame)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload).await?;
    writer.write_all(&[GUEST_EOT]).await?;
    writer.flush().await
}
