//! Minimal HTTP/1.1 client for the loopback daemon.
//!
//! Requests are one-shot (`Connection: close`) with short timeouts so a missing or
//! wedged daemon never stalls the agent's hook.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use agent_monitor_protocol::MAX_REQUEST_BYTES;
use serde_json::Value;

const CONNECT_TIMEOUT_MS: u64 = 500;
const READ_TIMEOUT_MS: u64 = 2_000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to daemon: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed daemon response: {0}")]
    MalformedResponse(String),

    #[error("Daemon returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl ClientError {
    /// True only when nothing reached the daemon.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json(&self) -> Result<Value, ClientError> {
        serde_json::from_str(&self.body)
            .map_err(|err| ClientError::MalformedResponse(format!("invalid JSON body: {}", err)))
    }
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    addr: SocketAddr,
}

impl DaemonClient {
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
        }
    }

    pub fn get(&self, path: &str) -> Result<HttpResponse, ClientError> {
        self.request("GET", path, &[])
    }

    pub fn post_json(&self, path: &str, body: &[u8]) -> Result<HttpResponse, ClientError> {
        self.request("POST", path, body)
    }

    /// Posts `body`, retrying once after a short pause if the connection was refused.
    ///
    /// Any later failure may mean the daemon already applied the payload, so it is
    /// not resent.
    pub fn post_with_retry(&self, path: &str, body: &[u8]) -> Result<HttpResponse, ClientError> {
        match self.post_json(path, body) {
            Ok(response) => Ok(response),
            Err(err) if !err.is_retryable() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, path, "Failed to deliver hook payload; retrying");
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                self.post_json(path, body).inspect_err(|retry_err| {
                    tracing::warn!(error = %retry_err, path, "Retry failed delivering hook payload");
                })
            }
        }
    }

    fn request(&self, method: &str, path: &str, body: &[u8]) -> Result<HttpResponse, ClientError> {
        let mut stream =
            TcpStream::connect_timeout(&self.addr, Duration::from_millis(CONNECT_TIMEOUT_MS))
                .map_err(|source| ClientError::Connect {
                    addr: self.addr,
                    source,
                })?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        let head = format!(
            "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
            addr = self.addr,
            len = body.len(),
        );
        stream.write_all(head.as_bytes())?;
        stream.write_all(body)?;
        stream.flush()?;

        let mut raw = Vec::new();
        stream
            .take((MAX_REQUEST_BYTES + 1) as u64)
            .read_to_end(&mut raw)?;
        if raw.len() > MAX_REQUEST_BYTES {
            return Err(ClientError::MalformedResponse(
                "response exceeded maximum size".to_string(),
            ));
        }

        let response = parse_response(&raw)?;
        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(ClientError::Status {
                status: response.status,
                body: response.body,
            })
        }
    }
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse, ClientError> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| ClientError::MalformedResponse("missing header terminator".to_string()))?;

    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ClientError::MalformedResponse("missing status line".to_string()))?;

    let content_length = head.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse::<usize>().ok())
            .flatten()
    });
    let body = match content_length {
        Some(len) if len <= body.len() => &body[..len],
        _ => body,
    };

    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}
