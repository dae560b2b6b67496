use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult, DistributedError};

use super::types::WireMessage;

/// Upper bound for one encoded message, newline included.
const MAX_MESSAGE_BYTES: u64 = 4 * 1024 * 1024;

/// Read one newline-delimited JSON message. A line longer than
/// `MAX_MESSAGE_BYTES` is refused before it is buffered completely.
pub(in crate::distributed) async fn read_message<R>(reader: &mut R) -> AppResult<WireMessage>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_MESSAGE_BYTES)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|err| {
            AppError::distributed(DistributedError::Io {
                context: "read wire message",
                source: err,
            })
        })?;
    if read == 0 {
        return Err(AppError::distributed(DistributedError::ConnectionClosed));
    }
    let Some(body) = line.strip_suffix(b"\n") else {
        // Either the cap was hit or the peer closed mid-line.
        if u64::try_from(line.len()).unwrap_or(u64::MAX) >= MAX_MESSAGE_BYTES {
            return Err(AppError::distributed(DistributedError::WireMessageTooLarge {
                max_bytes: usize::try_from(MAX_MESSAGE_BYTES).unwrap_or(usize::MAX),
            }));
        }
        return Err(AppError::distributed(DistributedError::ConnectionClosed));
    };
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    let text = std::str::from_utf8(body).map_err(|err| {
        AppError::distributed(DistributedError::WireMessageInvalidUtf8 { source: err })
    })?;
    serde_json::from_str(text).map_err(|err| {
        AppError::distributed(DistributedError::Deserialize {
            context: "wire message",
            source: err,
        })
    })
}

/// Encode `message` as one JSON line.
pub(in crate::distributed) async fn send_message<W>(
    writer: &mut W,
    message: &WireMessage,
) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message).map_err(|err| {
        AppError::distributed(DistributedError::Serialize {
            context: "wire message",
            source: err,
        })
    })?;
    line.push(b'\n');
    writer.write_all(&line).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "send wire message",
            source: err,
        })
    })
}
