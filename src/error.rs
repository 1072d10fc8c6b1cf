//! Error types for the gate client
//!
//! Two families live here. `StatusError` is the structured value surfaced to
//! consumers next to the connection status; it never travels as an `Err`.
//! `GateError` aggregates the crate-internal failures (configuration,
//! transport setup, credential store, command validation).

use crate::credentials::StoreError;
use crate::protocol::CommandError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of a surfaced connection error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Transport-level failure (refused connection, protocol error)
    General,
    /// A subscribe, unsubscribe or publish operation failed
    Topic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::General => f.write_str("General"),
            ErrorKind::Topic => f.write_str("Topic"),
        }
    }
}

/// Latest error recorded by the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StatusError {
    pub fn general<S: AsRef<str>>(message: S) -> Self {
        Self {
            kind: ErrorKind::General,
            message: sanitize_error_message(message.as_ref()),
        }
    }

    pub fn topic<S: AsRef<str>>(message: S) -> Self {
        Self {
            kind: ErrorKind::Topic,
            message: sanitize_error_message(message.as_ref()),
        }
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Main error type for gate client operations
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Command rejected: {0}")]
    Command(#[from] CommandError),

    #[error("Gate client is no longer running")]
    ClientStopped,

    #[error("No credentials stored; run `gatectl login` first")]
    MissingCredentials,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(StatusError),
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+").expect("valid secret pattern")
});

static CREDENTIALS_IN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://[^/@\s:]+:[^/@\s]+@").expect("valid url credentials pattern"));

const MAX_MESSAGE_LEN: usize = 300;

/// Redact credentials and cap the length of messages shown to users
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = CREDENTIALS_IN_URL
        .replace_all(&sanitized, "://***@")
        .to_string();

    if sanitized.chars().count() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let keep = MAX_MESSAGE_LEN - truncate_suffix.len();
        sanitized = sanitized.chars().take(keep).collect::<String>() + truncate_suffix;
    }

    sanitized
}

/// Result type for gate client operations
pub type GateResult<T> = Result<T, GateError>;
