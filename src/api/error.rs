//! Client-side error types for REST and push channel calls.
//!
//! Every failure maps to a short, user-facing message (see
//! [`ClientError::user_message`]) so handlers can surface a toast and keep
//! the last known state.

use thiserror::Error;

use crate::core_state::CoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Cannot reach backend at {0}")]
    Connection(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Response parsing error: {0}")]
    Decode(String),
    #[error("Push channel error: {0}")]
    Socket(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("State error: {0}")]
    Core(#[from] CoreError),
}

impl ClientError {
    /// Stable code for logs and UI analytics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "OFFLINE",
            Self::Timeout(_) => "TIMEOUT",
            Self::Http(_) => "HTTP",
            Self::Status { status: 401, .. } | Self::Status { status: 403, .. } => "AUTH_REQUIRED",
            Self::Status { status: 404, .. } => "NOT_FOUND",
            Self::Status { status: 429, .. } => "RATE_LIMITED",
            Self::Status { .. } => "BACKEND",
            Self::Decode(_) => "BAD_RESPONSE",
            Self::Socket(_) => "PUSH",
            Self::Config(_) => "CONFIG",
            Self::Core(_) => "INTERNAL",
        }
    }

    /// Message suitable for a toast. Backend bodies are never shown.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(_) | Self::Http(_) => {
                "Cannot reach the hospital server. Showing the last known queue.".to_string()
            }
            Self::Timeout(_) => "The hospital server is slow to respond. Retrying shortly.".to_string(),
            Self::Status { status: 401, .. } | Self::Status { status: 403, .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Status { status: 404, .. } => "That appointment could not be found.".to_string(),
            Self::Status { status: 429, .. } => "Too many requests. Please wait a moment.".to_string(),
            Self::Status { .. } | Self::Decode(_) => {
                "Something went wrong on the hospital server.".to_string()
            }
            Self::Socket(_) => "Live updates are unavailable. Refreshing periodically.".to_string(),
            Self::Config(_) | Self::Core(_) => "An internal error occurred.".to_string(),
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if err.is_connect() {
            Self::Connection(base_url.to_string())
        } else if err.is_timeout() {
            Self::Timeout(timeout_secs)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}
