//! Raw failures from outbound HTTP calls

use std::error::Error as StdError;
use std::fmt;
use std::io;

use http::StatusCode;
use thiserror::Error;

/// Transport-level failure code, named after the usual socket errno strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCode {
    ConnectionRefused,
    ConnectionReset,
    /// Connect failed for a reason the stack did not expose
    ConnectionFailed,
    HostNotFound,
    Tls,
    TimedOut,
    Aborted,
    Unknown,
}

impl TransportCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::ConnectionRefused => "ECONNREFUSED",
            TransportCode::ConnectionReset => "ECONNRESET",
            TransportCode::ConnectionFailed => "ECONNFAILED",
            TransportCode::HostNotFound => "ENOTFOUND",
            TransportCode::Tls => "ETLS",
            TransportCode::TimedOut => "ETIMEDOUT",
            TransportCode::Aborted => "ECONNABORTED",
            TransportCode::Unknown => "EUNKNOWN",
        }
    }

    /// Connection-refused family
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportCode::ConnectionRefused
                | TransportCode::ConnectionReset
                | TransportCode::ConnectionFailed
                | TransportCode::HostNotFound
                | TransportCode::Tls
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportCode::TimedOut | TransportCode::Aborted)
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to a provider or a deployed site
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No HTTP exchange happened
    #[error("{code}: {message}")]
    Transport { code: TransportCode, message: String },

    /// The peer answered with a non-success status
    #[error("HTTP {}: {message}", .status.as_u16())]
    Status { status: StatusCode, message: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn transport(code: TransportCode, message: impl Into<String>) -> Self {
        ProviderError::Transport {
            code,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Status {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: message.into(),
        }
    }

    /// Map a `reqwest` failure that produced no usable response
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = error_chain(err);

        if err.is_decode() {
            return ProviderError::InvalidResponse(message);
        }

        let code = if err.is_timeout() {
            TransportCode::TimedOut
        } else if err.is_connect() {
            match io_error_kind(err) {
                Some(io::ErrorKind::ConnectionRefused) => TransportCode::ConnectionRefused,
                Some(io::ErrorKind::ConnectionReset) => TransportCode::ConnectionReset,
                Some(io::ErrorKind::TimedOut) => TransportCode::TimedOut,
                _ if is_dns_failure(&message) => TransportCode::HostNotFound,
                _ if is_tls_failure(&message) => TransportCode::Tls,
                _ => TransportCode::ConnectionFailed,
            }
        } else {
            match io_error_kind(err) {
                Some(io::ErrorKind::ConnectionReset) => TransportCode::ConnectionReset,
                Some(io::ErrorKind::ConnectionAborted) => TransportCode::Aborted,
                Some(io::ErrorKind::TimedOut) => TransportCode::TimedOut,
                _ => TransportCode::Unknown,
            }
        };

        ProviderError::Transport { code, message }
    }
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

/// `reqwest` hides the interesting part of a failure in its source chain
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        let text = e.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        current = e.source();
    }
    parts.join(": ")
}

fn is_dns_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("dns error") || lower.contains("failed to lookup") || lower.contains("name or service not known")
}

fn is_tls_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake")
}
