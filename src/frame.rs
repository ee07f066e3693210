//! Length-prefixed framing: every request and response on the wire is a
//! 4-byte big-endian size followed by exactly that many bytes.

use crate::error::{BrokerError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Reads one frame and returns its payload without the length prefix.
///
/// Running out of input anywhere inside the frame yields
/// [`BrokerError::ConnectionClosed`]. A declared size above `max_frame_size`
/// is rejected before anything is allocated for it.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; LENGTH_PREFIX_SIZE];
    read_fully(reader, &mut size_buf).await?;

    let size = u32::from_be_bytes(size_buf) as usize;
    debug!("Incoming frame size: {}", size);
    if size > max_frame_size {
        return Err(BrokerError::malformed(format!(
            "declared frame size {} exceeds limit of {} bytes",
            size, max_frame_size
        )));
    }

    let mut payload = BytesMut::zeroed(size);
    read_fully(reader, &mut payload).await?;
    Ok(payload.freeze())
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) => {
            debug!("Read ended: {}", e);
            Err(BrokerError::ConnectionClosed)
        }
    }
}

/// Prepends the length prefix to `payload`.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let size = u32::try_from(payload.len()).map_err(|_| {
        BrokerError::malformed(format!("response of {} bytes is too large", payload.len()))
    })?;

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_u32(size);
    frame.extend_from_slice(payload);
    Ok(frame.freeze())
}

/// Writes prefix and payload with a single `write_all` so a frame is never
/// split by other output on the same writer.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
