//! Dispatcher error types

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RestError {
    /// The server refused the request (400, 401, 403, 404, 405). Never retried.
    #[error("{method} {endpoint} rejected with status {status}: {message}")]
    Rejected {
        method: Method,
        endpoint: String,
        status: u16,
        message: String,
        code: Option<i64>,
        errors: Option<Value>,
    },

    #[error("{method} {endpoint} returned unexpected status {status}")]
    UnexpectedStatus {
        method: Method,
        endpoint: String,
        status: u16,
    },

    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("no token set")]
    MissingToken,

    #[error("token is empty or contains whitespace")]
    InvalidToken,

    /// The queue holding this request went away before replaying it
    #[error("request queue for {0} was dropped")]
    QueueClosed(String),
}

/// Coarse classification of [`RestError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestErrorKind {
    /// Network failure; the caller may retry
    Transient,
    /// Server rejected the request itself
    Rejected,
    /// Unknown status or undecodable body
    Protocol,
    /// Token missing or malformed
    Configuration,
    /// Dispatcher shut down under the request
    Closed,
}

impl RestError {
    #[must_use]
    pub fn kind(&self) -> RestErrorKind {
        match self {
            Self::Transport { .. } => RestErrorKind::Transient,
            Self::Rejected { .. } => RestErrorKind::Rejected,
            Self::UnexpectedStatus { .. } | Self::Decode { .. } => RestErrorKind::Protocol,
            Self::MissingToken | Self::InvalidToken => RestErrorKind::Configuration,
            Self::QueueClosed(_) => RestErrorKind::Closed,
        }
    }

    /// HTTP status carried by the error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } | Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server error code from a rejection body
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rejected { code, .. } => *code,
            _ => None,
        }
    }
}
