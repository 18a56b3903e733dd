//! HTTP header reading and writing over a [`Connection`].
//!
//! Only the slice of HTTP the overlay speaks: 1.0-style requests and
//! responses, custom headers, and Content-Length bodies. Header
//! parsing accepts both CRLFCRLF and LFLF terminators and returns
//! any body bytes read too far to the connection's unget buffer.

use crate::connection::Connection;
use crate::{Result, TransportError, HTTP_BAD_REQUEST};

/// Default content type for transfer bodies.
pub const CONTENT_TYPE_DEFAULT: &str = "application/binary";

/// Hard cap on header size.
const HEADER_MAX: usize = 16 * 1024;

/// A parsed HTTP header block.
#[derive(Debug, Clone)]
pub struct HttpHeader {
    raw: String,
    status: Option<u16>,
    content_length: Option<u64>,
}

impl HttpHeader {
    /// The raw header text, terminator included.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The first line (request line or status line).
    pub fn start_line(&self) -> &str {
        self.raw.lines().next().unwrap_or_default()
    }

    /// The response status, when the header is a response. A
    /// malformed status line reads as 400.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Content-Length, when present (name matched case-insensitively).
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// A header field's trimmed value, matched case-insensitively.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.raw.lines().skip(1).find_map(|line| {
            let (field, value) = line.split_once(':')?;
            if field.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }
}

impl Connection {
    /// Read one HTTP header block.
    ///
    /// Reads until an empty line; bytes beyond the terminator are
    /// pushed back so the body can be read (or the header re-read)
    /// afterwards. Fails when the peer closes early or the header
    /// outgrows the cap.
    pub async fn read_http_header(&mut self) -> Result<HttpHeader> {
        let mut collected: Vec<u8> = Vec::with_capacity(512);
        let mut buf = [0u8; 512];
        let body_start = loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::BadHeader);
            }
            collected.extend_from_slice(&buf[..n]);
            if let Some(end) = header_end(&collected) {
                break end;
            }
            if collected.len() > HEADER_MAX {
                return Err(TransportError::BadHeader);
            }
        };

        if collected.len() > body_start {
            self.unget(&collected[body_start..]);
            collected.truncate(body_start);
        }

        let raw = String::from_utf8_lossy(&collected).into_owned();
        let status = parse_status(&raw);
        let content_length = parse_content_length(&raw);
        Ok(HttpHeader {
            raw,
            status,
            content_length,
        })
    }

    /// Write an HTTP request header.
    ///
    /// `extra` is preformatted `Name: value\r\n` lines. When the
    /// connection runs through a proxy, the request line carries the
    /// absolute-form URI. `content` adds Content-Type and
    /// Content-Length for a body the caller writes next.
    pub async fn write_http_request(
        &mut self,
        method: &str,
        path: &str,
        extra: &str,
        content: Option<(&str, u64)>,
    ) -> Result<()> {
        let mut header = if self.is_proxied() {
            format!(
                "{method} http://{}:{}{path} HTTP/1.0\r\n{extra}",
                self.peer_ip(),
                self.peer_port(),
            )
        } else {
            format!("{method} {path} HTTP/1.0\r\n{extra}")
        };
        push_content(&mut header, content);
        header.push_str("\r\n");
        self.write_all(header.as_bytes()).await
    }

    /// Write an HTTP response header.
    pub async fn write_http_response(
        &mut self,
        status: u16,
        extra: &str,
        content: Option<(&str, u64)>,
    ) -> Result<()> {
        let reason = match status {
            200 => " OK",
            400 => " Bad Request",
            401 => " Unauthorized",
            404 => " Not Found",
            _ => "",
        };
        let mut header = format!("HTTP/1.0 {status}{reason}\r\n{extra}");
        push_content(&mut header, content);
        header.push_str("\r\n");
        self.write_all(header.as_bytes()).await
    }
}

fn push_content(header: &mut String, content: Option<(&str, u64)>) {
    if let Some((content_type, length)) = content {
        header.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {length}\r\n"
        ));
    }
}

/// Index one past the header terminator, accepting CRLFCRLF or LFLF.
fn header_end(data: &[u8]) -> Option<usize> {
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = data.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Status from a response start line: the numeric token after the
/// `HTTP` token; anything malformed reads as 400. Request lines
/// yield `None`.
fn parse_status(raw: &str) -> Option<u16> {
    let line = raw.lines().next()?;
    if !line.starts_with("HTTP") {
        return None;
    }
    let token = line.split_whitespace().nth(1);
    Some(
        token
            .and_then(|t| t.parse::<u16>().ok())
            .unwrap_or(HTTP_BAD_REQUEST),
    )
}

fn parse_content_length(raw: &str) -> Option<u64> {
    raw.lines().skip(1).find_map(|line| {
        let (field, value) = line.split_once(':')?;
        if field.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
