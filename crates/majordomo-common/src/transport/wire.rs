//! Multipart message framing over a byte stream
//!
//! ```text
//! [u32 frame count] ([u32 frame length] [frame bytes])*
//! ```
//!
//! All integers are big-endian. A stream that ends exactly on a message
//! boundary is a clean close; ending anywhere else is a connection error.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{MajordomoError, Result};
use crate::protocol::Frames;

/// Maximum total size of one message (100 MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Maximum number of frames in one message
pub const MAX_FRAMES: usize = 64;

/// Reads one message. Returns `Ok(None)` when the peer closed the stream
/// between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Frames>>
where
    R: AsyncRead + Unpin,
{
    let mut count_buf = [0u8; 4];
    match reader.read_exact(&mut count_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(map_io_error(e, "reading frame count")),
    }

    let count = u32::from_be_bytes(count_buf) as usize;
    if count == 0 || count > MAX_FRAMES {
        return Err(MajordomoError::Transport(format!(
            "Invalid frame count: {} (max {})",
            count, MAX_FRAMES
        )));
    }

    let mut frames = Vec::with_capacity(count);
    let mut total = 0usize;
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading frame length"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        total += len;
        if total > MAX_MESSAGE_SIZE {
            return Err(MajordomoError::MessageTooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading frame data"))?;
        frames.push(Bytes::from(buf));
    }

    Ok(Some(frames))
}

/// Writes one message and flushes the stream.
pub async fn write_message<W>(writer: &mut W, frames: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frames.is_empty() || frames.len() > MAX_FRAMES {
        return Err(MajordomoError::Transport(format!(
            "Invalid frame count: {} (max {})",
            frames.len(),
            MAX_FRAMES
        )));
    }
    let size: usize = frames.iter().map(Bytes::len).sum();
    if size > MAX_MESSAGE_SIZE {
        return Err(MajordomoError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(4 + frames.len() * 4 + size);
    buf.extend_from_slice(&(frames.len() as u32).to_be_bytes());
    for frame in frames {
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(frame);
    }

    writer
        .write_all(&buf)
        .await
        .map_err(|e| map_io_error(e, "writing message"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;

    Ok(())
}

/// Map IO errors to connection-level errors where the stream is unusable.
fn map_io_error(err: std::io::Error, context: &str) -> MajordomoError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => {
            MajordomoError::Connection(format!("{}: connection lost", context))
        }
        _ => MajordomoError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frames = vec![
            Bytes::new(),
            Bytes::from_static(b"MDPC01"),
            Bytes::from_static(b"echo"),
        ];

        write_message(&mut a, &frames).await.unwrap();
        let received = read_message(&mut b).await.unwrap();
        assert_eq!(received, Some(frames));
    }

    #[tokio::test]
    async fn test_clean_close_between_messages() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert_eq!(read_message(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_message_is_connection_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&2u32.to_be_bytes()).await.unwrap();
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(b"ab").await.unwrap();
        drop(a);

        let err = read_message(&mut b).await.unwrap_err();
        assert!(err.is_connection_lost(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_too_many_frames_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAMES as u32) + 1).to_be_bytes()).await.unwrap();

        assert!(matches!(
            read_message(&mut b).await,
            Err(MajordomoError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&1u32.to_be_bytes()).await.unwrap();
        a.write_all(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes()).await.unwrap();

        assert!(matches!(
            read_message(&mut b).await,
            Err(MajordomoError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_message_cannot_be_written() {
        let (mut a, _b) = tokio::io::duplex(64);
        assert!(write_message(&mut a, &[]).await.is_err());
    }
}
