//! Forge API error types.
//!
//! The error taxonomy drives the retry layer and the planner's failure
//! handling:
//!
//! - **Transient** errors are retried with bounded backoff (5xx, 429,
//!   timeouts, connection failures).
//! - **Permanent** errors are surfaced once as a block-severity finding and
//!   not retried until a new event arrives (most 4xx).
//! - **NotFound** (404) means the object is gone; the cycle ends without a
//!   user-visible finding.

use std::fmt;
use thiserror::Error;

/// The kind of forge API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Requires human or operator intervention; retrying cannot help.
    Permanent,

    /// The addressed object does not exist (HTTP 404).
    NotFound,
}

impl ApiErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiErrorKind::Transient)
    }

    /// Classifies an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => ApiErrorKind::NotFound,
            429 => ApiErrorKind::Transient,
            s if s >= 500 => ApiErrorKind::Transient,
            _ => ApiErrorKind::Permanent,
        }
    }
}

/// An error talking to the forge or tracker REST API.
#[derive(Debug, Error)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "API error (HTTP {}): {}", code, self.message),
            None => write!(f, "API error: {}", self.message),
        }
    }
}

impl ApiError {
    /// Creates an error classified from an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an HTTP status (network failures).
    pub fn transient(message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::Transient,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a permanent error without an HTTP status.
    pub fn permanent(message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::Permanent,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a reqwest transport error; timeouts and connection failures are
    /// transient, everything carrying a status is classified by that status.
    pub fn from_reqwest(context: &str, source: reqwest::Error) -> Self {
        let status = source.status().map(|s| s.as_u16());
        let kind = match status {
            Some(code) => ApiErrorKind::from_status(code),
            None => ApiErrorKind::Transient,
        };
        ApiError {
            kind,
            status,
            message: format!("{context}: {source}"),
            source: Some(source),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }
}
