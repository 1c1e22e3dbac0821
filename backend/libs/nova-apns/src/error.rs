use std::time::Duration;

use thiserror::Error;

/// APNs client error types
///
/// `Configuration` and `Credential` are fatal for a send and are returned
/// before anything reaches the gateway. `Transport` and `Timeout` describe a
/// single attempt and end up on a [`NotificationOutcome`](crate::NotificationOutcome);
/// the caller decides whether to resubmit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApnsError {
    #[error("APNs configuration error: {0}")]
    Configuration(String),

    #[error("APNs credential error: {0}")]
    Credential(String),

    #[error("APNs transport failure: {0}")]
    Transport(String),

    #[error("APNs request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse APNs response: {0}")]
    ResponseParse(String),

    #[error("APNs worker queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("APNs worker pool has been shut down")]
    PoolShutdown,
}

impl ApnsError {
    /// Errors that only a configuration change can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApnsError::Configuration(_) | ApnsError::Credential(_))
    }
}

impl From<jsonwebtoken::errors::Error> for ApnsError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        ApnsError::Credential(format!("failed to sign provider token: {err}"))
    }
}

impl From<reqwest::Error> for ApnsError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_body() || err.is_decode() {
            "response body unreadable"
        } else {
            "request failed"
        };
        // reqwest's Display omits the underlying cause (DNS, TLS handshake)
        let mut detail = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        ApnsError::Transport(format!("{kind}: {detail}"))
    }
}

pub type Result<T> = std::result::Result<T, ApnsError>;
