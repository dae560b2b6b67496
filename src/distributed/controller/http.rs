//! Just enough HTTP/1.1 for the admin surface: one request with an optional
//! `Content-Length` body in, one JSON document out, then the connection
//! closes.
use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult, DistributedError};

use super::control::ControlError;

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub(super) struct AdminRequest {
    pub(super) method: String,
    pub(super) path: String,
    headers: HashMap<String, String>,
    pub(super) body: String,
}

impl AdminRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub(super) fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// `true` when no token is configured or the bearer token matches.
    pub(super) fn is_authorized(&self, token: Option<&str>) -> bool {
        token.is_none_or(|token| {
            self.header("authorization")
                .and_then(|value| value.strip_prefix("Bearer "))
                .is_some_and(|presented| presented.trim() == token)
        })
    }
}

async fn read_head_line<R>(reader: &mut R, consumed: &mut usize) -> Result<String, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader
        .read_line(&mut line)
        .await
        .map_err(|err| ControlError::new(400, format!("Failed to read request: {}", err)))?;
    *consumed = consumed.saturating_add(bytes);
    if *consumed > MAX_HEAD_BYTES {
        return Err(ControlError::new(413, "Request head too large"));
    }
    if bytes == 0 {
        return Err(ControlError::new(400, "Connection closed mid-request"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

/// Reads the request line, headers and body. Bodies must be UTF-8 and
/// announced by `Content-Length`; chunked uploads are refused.
pub(super) async fn read_admin_request<R>(reader: &mut R) -> Result<AdminRequest, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;
    let request_line = read_head_line(reader, &mut consumed).await?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(ControlError::new(400, "Malformed request line"));
    };
    let (method, path) = (method.to_owned(), path.to_owned());

    let mut headers = HashMap::new();
    loop {
        let line = read_head_line(reader, &mut consumed).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ControlError::new(400, "Malformed header"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    if headers.contains_key("transfer-encoding") {
        return Err(ControlError::new(411, "Send the body with a Content-Length"));
    }
    let length = match headers.get("content-length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_invalid| ControlError::new(400, "Invalid Content-Length"))?,
        None => 0,
    };
    if length > MAX_BODY_BYTES {
        return Err(ControlError::new(413, "Request body too large"));
    }
    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| ControlError::new(400, format!("Failed to read request body: {}", err)))?;
    let body = String::from_utf8(body)
        .map_err(|_invalid| ControlError::new(400, "Request body is not valid UTF-8"))?;
    Ok(AdminRequest {
        method,
        path,
        headers,
        body,
    })
}

const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Errors are rendered as `{"error": "..."}` with the error's status.
pub(super) async fn write_reply<W>(
    writer: &mut W,
    reply: Result<Value, ControlError>,
) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let (status, document) = match reply {
        Ok(document) => (200, document),
        Err(err) => (err.status, json!({ "error": err.message })),
    };
    let body = serde_json::to_vec(&document).map_err(|err| {
        AppError::distributed(DistributedError::Serialize {
            context: "admin response",
            source: err,
        })
    })?;
    let mut response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason_phrase(status),
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    writer.write_all(&response).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "write admin response",
            source: err,
        })
    })?;
    writer.flush().await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "flush admin response",
            source: err,
        })
    })
}
