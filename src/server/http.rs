//! Minimal HTTP/1.1 framing: one request per connection.
//!
//! Reads a request line, headers, and a `Content-Length` body; writes a
//! JSON response with `Connection: close`. Chunked request bodies are not
//! accepted.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::routes::HttpResponse;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
/// Largest request line plus headers accepted.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A request whose head parsed. The body read may still have failed.
#[derive(Debug)]
pub struct RawRequest {
    /// Request method as sent.
    pub method: String,
    /// Request target (path and query).
    pub target: String,
    /// Body bytes, or why they could not be read.
    pub body: Result<Vec<u8>, io::Error>,
}

/// Why a request head was rejected.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    /// Socket failure while reading the head.
    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
    /// The connection closed part way through the head.
    #[error("request head truncated")]
    Truncated,
    /// The head exceeds [`MAX_HEAD_BYTES`].
    #[error("request head too large")]
    TooLarge,
    /// The request line or a header is not well-formed.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// A transfer coding other than identity.
    #[error("unsupported transfer encoding")]
    UnsupportedEncoding,
}

/// Read one request.
///
/// Returns `Ok(None)` when the peer closes without sending anything. When
/// the client asks for `100-continue`, the interim response is written to
/// `writer` before the body is read.
///
/// # Errors
///
/// Returns [`HeadError`] if the request line or headers cannot be read or
/// parsed.
pub async fn read_request<R, W>(
    reader: &mut R,
    writer: &mut W,
) -> Result<Option<RawRequest>, HeadError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;
    let mut line = String::new();

    if read_head_line(reader, &mut line, &mut budget).await? == 0 {
        return Ok(None);
    }
    let (method, target) = parse_request_line(line.trim_end())?;

    let mut content_length = 0_usize;
    let mut expect_continue = false;
    loop {
        line.clear();
        if read_head_line(reader, &mut line, &mut budget).await? == 0 {
            return Err(HeadError::Truncated);
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| HeadError::Malformed(format!("header without colon: {header}")))?;
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| HeadError::Malformed(format!("bad content-length: {value}")))?;
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && !value.eq_ignore_ascii_case("identity")
        {
            return Err(HeadError::UnsupportedEncoding);
        } else if name.eq_ignore_ascii_case("expect") && value.eq_ignore_ascii_case("100-continue")
        {
            expect_continue = true;
        }
    }

    let body = if content_length > MAX_BODY_BYTES {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request body too large",
        ))
    } else {
        if expect_continue && content_length > 0 {
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            writer.flush().await?;
        }
        let mut body = vec![0_u8; content_length];
        reader.read_exact(&mut body).await.map(|_| body)
    };

    Ok(Some(RawRequest {
        method,
        target,
        body,
    }))
}

async fn read_head_line<R>(
    reader: &mut R,
    line: &mut String,
    budget: &mut usize,
) -> Result<usize, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(*budget).unwrap_or(u64::MAX);
    let read = (&mut *reader).take(limit).read_line(line).await?;
    if read > 0 && !line.ends_with('\n') {
        return Err(if read >= *budget {
            HeadError::TooLarge
        } else {
            HeadError::Truncated
        });
    }
    *budget = budget.saturating_sub(read);
    Ok(read)
}

fn parse_request_line(line: &str) -> Result<(String, String), HeadError> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HeadError::Malformed(format!("bad request line: {line}")));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HeadError::Malformed(format!("unsupported version: {version}")));
    }
    if !target.starts_with('/') {
        return Err(HeadError::Malformed(format!("bad request target: {target}")));
    }
    Ok((method.to_owned(), target.to_owned()))
}

/// Write `response` as JSON and close the write side.
///
/// # Errors
///
/// Returns the socket error if the response cannot be written.
pub async fn write_response<W>(writer: &mut W, response: &HttpResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = response.body.to_string();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}
