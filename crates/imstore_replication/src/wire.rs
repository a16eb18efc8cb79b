//! Framed messages over a byte stream.

use imstore_codec::{FrameHeader, Message, HEADER_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ReplicationError, ReplicationResult};

/// Reads one frame. A clean EOF before the header is a retryable transport
/// error.
pub async fn read_message<R>(reader: &mut R) -> ReplicationResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let header = FrameHeader::parse(&header)?;
    if header.frame_len() > MAX_FRAME_SIZE {
        return Err(ReplicationError::Protocol(format!(
            "frame of {} bytes exceeds {MAX_FRAME_SIZE}",
            header.frame_len()
        )));
    }
    let mut body = vec![0u8; header.body_len];
    reader.read_exact(&mut body).await?;
    let mut message = Message::from_body_bytes(header.cmd, header.version, header.flag, &body)?;
    message.seq = header.seq;
    Ok(message)
}

/// Writes an encoded frame and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> ReplicationResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes and writes one message.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> ReplicationResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode_frame()?;
    write_frame(writer, &frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use imstore_codec::{ImMessage, MessageBatch};

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let batch = MessageBatch::new(32, 32, vec![Message::im(ImMessage::default())]);
        write_message(&mut client, &Message::sync_begin(77)).await.unwrap();
        write_message(&mut client, &Message::sync_batch(batch.clone())).await.unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), Message::sync_begin(77));
        assert_eq!(read_message(&mut server).await.unwrap(), Message::sync_batch(batch));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = Vec::new();
        header.extend_from_slice(&(MAX_FRAME_SIZE as i32).to_be_bytes());
        header.extend_from_slice(&[0, 0, 0, 0, 220, 1, 0, 0]);
        write_frame(&mut client, &header).await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol(_)));
    }

    #[tokio::test]
    async fn eof_is_retryable() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_message(&mut server).await.unwrap_err().is_retryable());
    }
}
