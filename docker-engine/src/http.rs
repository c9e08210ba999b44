//! Minimal HTTP/1.1 framing for the engine's unix socket.
//!
//! Only what the engine speaks is supported: `Content-Length` and chunked
//! bodies, bodies delimited by connection close, and the `Upgrade: tcp`
//! handshake used to hijack attach and exec connections.

use crate::error::{EngineError, Result};
use std::io::{BufRead, Read, Write};

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl Head {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    }

    fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Write a request. `upgrade` asks the engine to hijack the connection.
pub fn write_request<W: Write>(
    out: &mut W,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
    upgrade: bool,
) -> std::io::Result<()> {
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: docker\r\nUser-Agent: container-shell\r\n");
    if upgrade {
        head.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n");
    } else {
        head.push_str("Connection: close\r\n");
    }
    match body {
        Some(body) => {
            head.push_str("Content-Type: application/json\r\n");
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            out.write_all(head.as_bytes())?;
            out.write_all(body)?;
        }
        None => {
            head.push_str("Content-Length: 0\r\n\r\n");
            out.write_all(head.as_bytes())?;
        }
    }
    out.flush()
}

/// Read the status line and headers one byte at a time.
///
/// Reading byte-wise never consumes past the blank line, so after an upgrade
/// the caller can hand the raw connection to the relay untouched.
pub fn read_head<R: Read>(input: &mut R) -> Result<Head> {
    let mut raw = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        if input.read(&mut byte)? == 0 {
            return Err(EngineError::Protocol(
                "connection closed before response headers".to_string(),
            ));
        }
        raw.push(byte[0]);
        if raw.len() > 64 * 1024 {
            return Err(EngineError::Protocol("response headers too large".to_string()));
        }
    }
    parse_head(&String::from_utf8_lossy(&raw))
}

fn parse_head(text: &str) -> Result<Head> {
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| EngineError::Protocol(format!("bad status line '{status_line}'")))?;

    let headers = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
            l.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    Ok(Head { status, headers })
}

/// Read the body that follows `head`.
pub fn read_body<R: BufRead>(input: &mut R, head: &Head) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    if head.is_chunked() {
        loop {
            let mut size_line = String::new();
            input.read_line(&mut size_line)?;
            let size_hex = size_line.trim().split(';').next().unwrap_or_default();
            let size = usize::from_str_radix(size_hex, 16)
                .map_err(|_| EngineError::Protocol(format!("bad chunk size '{size_hex}'")))?;
            if size == 0 {
                break;
            }
            let start = body.len();
            body.resize(start + size, 0);
            input.read_exact(&mut body[start..])?;
            let mut crlf = [0u8; 2];
            input.read_exact(&mut crlf)?;
        }
    } else if let Some(len) = head.content_length() {
        body.resize(len, 0);
        input.read_exact(&mut body)?;
    } else {
        input.read_to_end(&mut body)?;
    }
    Ok(body)
}

/// Turn a non-success response into an [`EngineError::Api`], using the
/// engine's `{"message": ...}` body when present.
pub fn api_error(head: &Head, body: &[u8]) -> EngineError {
    #[derive(serde::Deserialize)]
    struct Message {
        message: String,
    }

    let message = serde_json::from_slice::<Message>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    EngineError::Api {
        status: head.status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn test_write_request_with_body() {
        let mut out = Vec::new();
        write_request(&mut out, "POST", "/v1.41/containers/create", Some(b"{}"), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("POST /v1.41/containers/create HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn test_write_request_upgrade() {
        let mut out = Vec::new();
        write_request(&mut out, "POST", "/exec/1/start", Some(b"{}"), true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Upgrade: tcp\r\n"));
        assert!(!text.contains("Connection: close"));
    }

    #[test]
    fn test_read_head_stops_at_blank_line() {
        let raw = b"HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\n\r\nraw bytes";
        let mut cursor = Cursor::new(&raw[..]);
        let head = read_head(&mut cursor).unwrap();
        assert_eq!(head.status, 101);
        assert_eq!(
            head.header("content-type"),
            Some("application/vnd.docker.raw-stream")
        );
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"raw bytes");
    }

    #[test]
    fn test_read_head_truncated() {
        let mut cursor = Cursor::new(&b"HTTP/1.1 200 OK\r\n"[..]);
        assert!(matches!(read_head(&mut cursor), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_read_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader).unwrap();
        let body = read_body(&mut reader, &head).unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn test_read_sized_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n[]  trailing";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader).unwrap();
        assert_eq!(read_body(&mut reader, &head).unwrap(), b"[]  ");
    }

    #[test]
    fn test_api_error_uses_message() {
        let head = Head {
            status: 409,
            headers: vec![],
        };
        let err = api_error(&head, br#"{"message":"container abc is not running"}"#);
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("is not running"));
    }
}
