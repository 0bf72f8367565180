//! Length-prefixed framing over async streams.
//!
//! Frame format: `[4-byte BE u32 length][frame body of length bytes]`. The body
//! is a [`Command`] encoding; a body that fails to decode still consumes
//! exactly its own bytes, so the stream stays in sync for the next frame.

use super::command::Command;
use crate::config::ProtocolConfig;
use crate::{Result, RpcError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Fail with [`RpcError::Protocol`] when a frame body of `len` bytes may not
/// go on the wire.
pub fn check_frame_size(len: usize) -> Result<()> {
    if len > ProtocolConfig::MAX_FRAME_SIZE {
        return Err(RpcError::Protocol {
            message: format!(
                "frame size {} exceeds maximum {}",
                len,
                ProtocolConfig::MAX_FRAME_SIZE
            ),
        });
    }
    Ok(())
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    check_frame_size(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(Some(body))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    check_frame_size(body.len())?;
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it as a [`Command`].
///
/// The outer `Result` fails only when the stream itself is broken; a frame
/// that was read in full but does not decode is reported in the inner one.
pub async fn read_command<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<Result<Command>>> {
    Ok(read_frame(reader).await?.map(Command::decode))
}

/// Encode and write one [`Command`] as a frame.
pub async fn write_command<W: AsyncWriteExt + Unpin>(writer: &mut W, command: &Command) -> Result<()> {
    write_frame(writer, &command.encode()).await
}
