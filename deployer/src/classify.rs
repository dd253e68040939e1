//! Failure classification for provider calls

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::http::error::ProviderError;

/// Stable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Authentication,
    ResourceNotFound,
    RateLimit,
    ServerError,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::ResourceNotFound => "resource_not_found",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether failures in this category are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::ServerError
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw failure mapped to a category and a retry flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub is_retryable: bool,
    /// Contains the original error text verbatim
    pub message: String,
}

/// Classify a provider failure. First match wins.
pub fn classify(error: &ProviderError) -> ClassifiedError {
    let (category, label) = match error {
        ProviderError::Transport { code, .. } if code.is_connection_failure() => {
            (ErrorCategory::Network, "Network error")
        }
        ProviderError::Transport { code, .. } if code.is_timeout() => {
            (ErrorCategory::Timeout, "Request timed out")
        }
        ProviderError::Status { status, .. } => match status.as_u16() {
            401 => (ErrorCategory::Authentication, "Authentication failed"),
            404 => (ErrorCategory::ResourceNotFound, "Resource not found"),
            429 => (ErrorCategory::RateLimit, "Rate limit exceeded"),
            s if s >= 500 => (ErrorCategory::ServerError, "Provider server error"),
            422 => (ErrorCategory::Validation, "Provider rejected the request"),
            _ => (ErrorCategory::Unknown, "Unexpected error"),
        },
        _ => (ErrorCategory::Unknown, "Unexpected error"),
    };

    ClassifiedError {
        category,
        is_retryable: category.is_retryable(),
        message: format!("{}: {}", label, error),
    }
}
