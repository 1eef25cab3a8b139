//! Opening handshake request
//!
//! Parses the HTTP request head sent by a client that wants to upgrade to a
//! WebSocket connection, and reads that head off an async stream.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::error::{HandshakeError, HandshakeResult};

/// Header carrying the client nonce
pub const KEY_HEADER: &str = "sec-websocket-key";

/// A parsed opening handshake request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// HTTP method from the request line
    pub method: String,
    /// Request target (e.g. `/` or `/chat`)
    pub path: String,
    /// Headers keyed by lower-cased name
    pub headers: HashMap<String, String>,
    /// The client-supplied `Sec-WebSocket-Key`, if present
    pub requested_accept_key: Option<String>,
}

impl HandshakeRequest {
    /// Parse a request head (request line plus header lines)
    ///
    /// Header names are matched case-insensitively. A repeated header keeps
    /// its last value.
    pub fn parse(head: &str) -> HandshakeResult<Self> {
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| HandshakeError::MalformedRequestLine(String::new()))?;

        let mut parts = request_line.split_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) if parts.next().is_none() => (m, p, v),
            _ => return Err(HandshakeError::MalformedRequestLine(request_line.to_string())),
        };
        if !version.starts_with("HTTP/") {
            return Err(HandshakeError::MalformedRequestLine(request_line.to_string()));
        }

        let mut headers = HashMap::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::MalformedHeader(line.to_string()))?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let requested_accept_key = headers.get(KEY_HEADER).cloned();

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            requested_accept_key,
        })
    }

    /// Look up a header by name, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Read a request head from `reader` and parse it
    ///
    /// Reads line by line so nothing past the blank line that ends the head
    /// is consumed from the underlying buffer.
    pub async fn read_from<R>(
        reader: &mut R,
        max_bytes: usize,
        timeout: Duration,
    ) -> HandshakeResult<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let head = tokio::time::timeout(timeout, read_head(reader, max_bytes))
            .await
            .map_err(|_| HandshakeError::Timeout(timeout))??;
        Self::parse(&head)
    }
}

async fn read_head<R>(reader: &mut R, max_bytes: usize) -> HandshakeResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = String::new();
    loop {
        // Never pull more than one byte past the limit off the reader
        let budget = (max_bytes - head.len() + 1) as u64;
        let mut line = String::new();
        let n = (&mut *reader).take(budget).read_line(&mut line).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
        if head.len() + n > max_bytes {
            return Err(HandshakeError::TooLarge { limit: max_bytes });
        }
        let blank = line == "\r\n" || line == "\n";
        head.push_str(&line);
        if blank {
            return Ok(head);
        }
    }
}
