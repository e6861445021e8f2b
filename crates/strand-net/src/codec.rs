//! Length-prefixed framing.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes
//! of postcard-encoded [`StorageMessage`].

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;
use crate::message::StorageMessage;

/// Maximum message size: 64 MiB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Encode and write one message.
pub async fn write_message<W>(writer: &mut W, message: &StorageMessage) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let payload = postcard::to_allocvec(message)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one message.
///
/// Returns `None` if the stream ends cleanly before a new frame starts.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<StorageMessage>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(postcard::from_bytes(&payload)?))
}
