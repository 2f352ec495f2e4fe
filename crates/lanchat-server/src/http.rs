//! Minimal HTTP/1.1 plumbing for the gateway.
//!
//! One request per connection: the head is parsed, the route handler reads
//! whatever body it needs, a single response is written and the connection
//! closes. No chunked encoding, no keep-alive.

use std::io;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on request line plus headers.
pub const MAX_HEAD_LEN: u64 = 16 * 1024;

/// Upper bound on bodies that are buffered in memory (JSON payloads).
pub const MAX_JSON_BODY: u64 = 64 * 1024;

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, X-File-Name"),
];

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request head exceeds {MAX_HEAD_LEN} bytes")]
    HeadTooLarge,

    #[error("request body of {size} bytes exceeds {max}")]
    BodyTooLarge { size: u64, max: u64 },

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason: &'static str,
}

impl Status {
    pub const OK: Status = Status::new(200, "OK");
    pub const BAD_REQUEST: Status = Status::new(400, "Bad Request");
    pub const NOT_FOUND: Status = Status::new(404, "Not Found");
    pub const PAYLOAD_TOO_LARGE: Status = Status::new(413, "Payload Too Large");
    pub const INTERNAL_SERVER_ERROR: Status = Status::new(500, "Internal Server Error");

    const fn new(code: u16, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

/// Parsed request head.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Raw request target, query string included.
    pub target: String,
    /// Header names are lower-cased.
    headers: Vec<(String, String)>,
}

impl Request {
    /// Request target without query string or fragment.
    pub fn path(&self) -> &str {
        match self.target.find(['?', '#']) {
            Some(end) => &self.target[..end],
            None => &self.target,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Result<Option<u64>, HttpError> {
        match self.header("content-length") {
            None => Ok(None),
            Some(value) => value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| HttpError::Malformed("invalid Content-Length")),
        }
    }
}

/// Read the request line and headers up to the blank line.
///
/// Returns `Ok(None)` when the peer closes before sending anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_LEN;

    let Some(request_line) = read_head_line(reader, &mut budget).await? else {
        return Ok(None);
    };
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(HttpError::Malformed("bad request line"));
    };
    let method = method.to_string();
    let target = target.to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_head_line(reader, &mut budget)
            .await?
            .ok_or(HttpError::Malformed("connection closed inside head"))?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(HttpError::Malformed("header without colon"))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok(Some(Request {
        method,
        target,
        headers,
    }))
}

async fn read_head_line<R>(reader: &mut R, budget: &mut u64) -> Result<Option<String>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader).take(*budget).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return if *budget == 0 {
            Err(HttpError::HeadTooLarge)
        } else {
            Ok(None)
        };
    }
    *budget -= n as u64;

    if !buf.ends_with(b"\n") {
        return Err(if *budget == 0 {
            HttpError::HeadTooLarge
        } else {
            HttpError::Malformed("truncated head")
        });
    }

    let line = String::from_utf8(buf).map_err(|_| HttpError::Malformed("head is not UTF-8"))?;
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Read exactly `len` body bytes into memory, refusing anything over `max`.
pub async fn read_body<R>(reader: &mut R, len: u64, max: u64) -> Result<Vec<u8>, HttpError>
where
    R: AsyncRead + Unpin,
{
    if len > max {
        return Err(HttpError::BodyTooLarge { size: len, max });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[derive(Debug)]
enum Body {
    Empty,
    Full(Bytes),
    File { file: File, len: u64 },
}

/// A single response. CORS headers are always added on write.
#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<(&'static str, String)>,
    body: Body,
}

impl Response {
    fn with_body(status: Status, content_type: &str, body: Bytes) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", content_type.to_string())],
            body: Body::Full(body),
        }
    }

    /// Empty response carrying nothing but the CORS headers.
    pub fn preflight() -> Self {
        Self {
            status: Status::OK,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn html(status: Status, body: impl Into<Bytes>) -> Self {
        Self::with_body(status, "text/html; charset=utf-8", body.into())
    }

    pub fn text(status: Status, body: impl Into<Bytes>) -> Self {
        Self::with_body(status, "text/plain; charset=utf-8", body.into())
    }

    pub fn json<T: Serialize>(status: Status, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::with_body(status, "application/json", body.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode JSON response");
                Self::with_body(
                    Status::INTERNAL_SERVER_ERROR,
                    "application/json",
                    Bytes::from_static(br#"{"error":"Internal server error"}"#),
                )
            }
        }
    }

    /// Stream `len` bytes of `file` as an attachment named `file_name`.
    pub fn attachment(file: File, len: u64, file_name: &str) -> Self {
        let quoted = file_name.replace(['"', '\\', '\r', '\n'], "_");
        Self {
            status: Status::OK,
            headers: vec![
                ("Content-Type", "application/octet-stream".to_string()),
                (
                    "Content-Disposition",
                    format!("attachment; filename=\"{quoted}\""),
                ),
            ],
            body: Body::File { file, len },
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// In-memory body, empty for preflight and streamed responses.
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            Body::Full(bytes) => bytes,
            Body::Empty | Body::File { .. } => &[],
        }
    }

    /// Write status line, headers and body. Returns the body length.
    pub async fn write_to<W>(self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status.code, self.status.reason);
        for (name, value) in CORS_HEADERS {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }

        let body_len = match &self.body {
            Body::Empty => None,
            Body::Full(bytes) => Some(bytes.len() as u64),
            Body::File { len, .. } => Some(*len),
        };
        if let Some(len) = body_len {
            head.push_str(&format!("Content-Length: {len}\r\nConnection: close\r\n"));
        }
        head.push_str("\r\n");
        writer.write_all(head.as_bytes()).await?;

        let written = match self.body {
            Body::Empty => 0,
            Body::Full(bytes) => {
                writer.write_all(&bytes).await?;
                bytes.len() as u64
            }
            Body::File { file, len } => tokio::io::copy(&mut file.take(len), writer).await?,
        };
        writer.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<Option<Request>, HttpError> {
        let mut reader = raw;
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn test_parse_head() {
        let raw = b"POST /api/messages?x=1 HTTP/1.1\r\nHost: a\r\ncontent-LENGTH: 12\r\n\r\n{\"a\":1}";
        let request = parse(raw).await.unwrap().unwrap();

        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/api/messages?x=1");
        assert_eq!(request.path(), "/api/messages");
        assert_eq!(request.header("Host"), Some("a"));
        assert_eq!(request.content_length().unwrap(), Some(12));
    }

    #[tokio::test]
    async fn test_body_is_left_in_reader() {
        let mut reader: &[u8] = b"POST / HTTP/1.1\nContent-Length: 5\n\nhello";
        let request = read_request(&mut reader).await.unwrap().unwrap();
        let len = request.content_length().unwrap().unwrap();
        let body = read_body(&mut reader, len, MAX_JSON_BODY).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_empty_connection() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_heads() {
        assert!(matches!(
            parse(b"GARBAGE\r\n\r\n").await,
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n").await,
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nHost: a\r\n").await,
            Err(HttpError::Malformed(_))
        ));

        let request = parse(b"GET / HTTP/1.1\r\nContent-Length: lots\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(request.content_length().is_err());
    }

    #[tokio::test]
    async fn test_oversized_head() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_LEN as usize));
        raw.extend_from_slice(b"\r\n\r\n");
        assert!(matches!(parse(&raw).await, Err(HttpError::HeadTooLarge)));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let mut reader: &[u8] = b"";
        assert!(matches!(
            read_body(&mut reader, MAX_JSON_BODY + 1, MAX_JSON_BODY).await,
            Err(HttpError::BodyTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_json_response() {
        let response = Response::json(Status::OK, &serde_json::json!({"status": "success"}));
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Access-Control-Allow-Headers: Content-Type, X-File-Name\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 20\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"status\":\"success\"}"));
    }

    #[tokio::test]
    async fn test_preflight_has_only_cors_headers() {
        let mut out = Vec::new();
        Response::preflight().write_to(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type, X-File-Name\r\n\
             \r\n"
        );
    }
}
