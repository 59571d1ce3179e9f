//! Opening handshake messages and their HTTP grammar.
//!
//! Only the subset of HTTP/1.1 needed to bootstrap a WebSocket is
//! understood: a request or status line, `Name: value` headers terminated
//! by CRLF, a blank line, and for the oldest drafts a short opaque body.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Request a Flash client sends before opening a socket.
pub const FLASH_POLICY_REQUEST: &[u8] = b"<policy-file-request/>\0";

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a `Sec-WebSocket-Key`: base64 of 16 random bytes.
///
/// # Errors
///
/// Returns [`Error::Io`] if the random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// Validate the Origin header against a list of allowed origins.
///
/// If `allowed` is empty, any origin (or no origin) is accepted.
///
/// # Errors
///
/// Returns `Error::OriginNotAllowed` if the origin is missing or not listed.
pub fn validate_origin(origin: Option<&str>, allowed: &[String]) -> Result<()> {
    if allowed.is_empty() {
        return Ok(());
    }

    match origin {
        Some(o) if allowed.iter().any(|a| a == o) => Ok(()),
        Some(o) => Err(Error::OriginNotAllowed {
            origin: o.to_string(),
        }),
        None => Err(Error::OriginNotAllowed {
            origin: "(none)".to_string(),
        }),
    }
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
///
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
pub fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Ordered header map with case-insensitive lookup.
///
/// A name appears at most once; repeated headers are folded into one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Value of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Value of `name`, or the empty string when absent.
    #[must_use]
    pub fn field(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// Whether `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set `name`, replacing any previous value but keeping its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add `name`, joining with `"; "` if it is already present.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => {
                let existing = &mut self.entries[i].1;
                existing.push_str("; ");
                existing.push_str(value);
            }
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// Remove `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write(&self, out: &mut BytesMut) -> Result<()> {
        for (name, value) in self.iter() {
            validate_header_value(name, value)?;
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
        Ok(())
    }

    /// Comma-separated tokens of `name`, trimmed, empty tokens dropped.
    #[must_use]
    pub fn tokens(&self, name: &str) -> Vec<String> {
        self.field(name)
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Client opening handshake (the HTTP request).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHandshake {
    /// Request target, e.g. `/chat`.
    pub resource: String,
    /// Request headers.
    pub headers: Headers,
    /// Trailing bytes that belong to the handshake (hixie-76 key3).
    pub content: Bytes,
}

impl ClientHandshake {
    /// Create a request for `resource`.
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    /// Header shortcut for [`Headers::field`].
    #[must_use]
    pub fn field(&self, name: &str) -> &str {
        self.headers.field(name)
    }

    /// Parse a request from the start of `buf`.
    ///
    /// Returns the request and the bytes consumed through the blank line.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteHandshake` until the blank line has arrived
    /// - `Error::InvalidHandshake` for a malformed request line or header
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let mut reader = LineReader::new(buf);
        let line = reader.next_line()?;
        let tokens: Vec<&str> = line.splitn(3, ' ').collect();
        if tokens.len() != 3 {
            return Err(Error::InvalidHandshake(format!(
                "malformed request line: {line}"
            )));
        }
        if !tokens[0].eq_ignore_ascii_case("GET") {
            return Err(Error::InvalidHandshake(format!(
                "unsupported method: {}",
                tokens[0]
            )));
        }
        let resource = tokens[1].to_string();
        let headers = reader.headers()?;
        Ok((
            Self {
                resource,
                headers,
                content: Bytes::new(),
            },
            reader.pos,
        ))
    }

    /// Serialize as `GET <resource> HTTP/1.1`, headers, blank line, content.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if a value contains CR or LF.
    pub fn write(&self, out: &mut BytesMut) -> Result<()> {
        validate_header_value("resource", &self.resource)?;
        out.put_slice(b"GET ");
        out.put_slice(self.resource.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");
        self.headers.write(out)?;
        out.put_slice(&self.content);
        Ok(())
    }
}

/// Server opening handshake (the HTTP response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    /// HTTP status code.
    pub status: u16,
    /// HTTP reason phrase.
    pub status_message: String,
    /// Response headers.
    pub headers: Headers,
    /// Trailing bytes that belong to the handshake (hixie-76 challenge).
    pub content: Bytes,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self {
            status: 101,
            status_message: "Switching Protocols".to_string(),
            headers: Headers::new(),
            content: Bytes::new(),
        }
    }
}

impl ServerHandshake {
    /// Header shortcut for [`Headers::field`].
    #[must_use]
    pub fn field(&self, name: &str) -> &str {
        self.headers.field(name)
    }

    /// Parse a response from the start of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteHandshake` until the blank line has arrived
    /// - `Error::InvalidHandshake` for a malformed status line or header
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let mut reader = LineReader::new(buf);
        let line = reader.next_line()?;
        let tokens: Vec<&str> = line.splitn(3, ' ').collect();
        if tokens.len() != 3 {
            return Err(Error::InvalidHandshake(format!(
                "malformed status line: {line}"
            )));
        }
        let status = tokens[1]
            .parse::<u16>()
            .map_err(|_| Error::InvalidHandshake(format!("invalid status: {}", tokens[1])))?;
        let status_message = tokens[2].to_string();
        let headers = reader.headers()?;
        Ok((
            Self {
                status,
                status_message,
                headers,
                content: Bytes::new(),
            },
            reader.pos,
        ))
    }

    /// Serialize as `HTTP/1.1 <status> <message>`, headers, blank line, content.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if a value contains CR or LF.
    pub fn write(&self, out: &mut BytesMut) -> Result<()> {
        validate_header_value("status", &self.status_message)?;
        out.put_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.status_message).as_bytes());
        self.headers.write(out)?;
        out.put_slice(&self.content);
        Ok(())
    }
}

struct LineReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LineReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn next_line(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(Error::IncompleteHandshake { needed: 0 })?;
        self.pos += end + 2;
        std::str::from_utf8(&rest[..end])
            .map_err(|_| Error::InvalidHandshake("handshake is not valid text".into()))
    }

    fn headers(&mut self) -> Result<Headers> {
        let mut headers = Headers::new();
        loop {
            let line = self.next_line()?;
            if line.is_empty() {
                return Ok(headers);
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidHandshake(format!("not an http header: {line}")))?;
            headers.append(name, value.trim_start_matches(' '));
        }
    }
}

/// Plain HTTP reply written when a server refuses an upgrade.
///
/// 404 is used for handshakes that match no draft, anything else is
/// reported as a 500.
#[must_use]
pub fn http_error_response(status: u16) -> Bytes {
    let description = match status {
        404 => "404 WebSocket Upgrade Failure",
        _ => "500 Internal Server Error",
    };
    let body = format!("<html><head></head><body><h1>{description}</h1></body></html>");
    Bytes::from(format!(
        "HTTP/1.1 {description}\r\nContent-Type: text/html\r\nServer: wsengine\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    ))
}

/// Format a timestamp as an RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
#[must_use]
pub fn http_date(time: SystemTime) -> String {
    const DAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let days = secs / 86_400;
    let rem = secs % 86_400;

    // Civil date from day count (Howard Hinnant's algorithm).
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        DAYS[(days % 7) as usize],
        day,
        MONTHS[(month - 1) as usize],
        year,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}
