//! Think errors
//!
//! Categorized by what the controller should do next: retry in place,
//! substitute another speaker, or mark the agent degraded.

use serde::{Deserialize, Serialize};

/// Errors from agent backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThinkError {
    /// Worth one retry, then substitution (rate limits, 5xx, resets,
    /// empty replies).
    #[error("transient backend failure: {message}")]
    Transient { message: String },

    /// The agent is misconfigured or rejected; strikes toward degradation.
    #[error("permanent backend failure: {message}")]
    Permanent { message: String },

    /// The call exceeded the think timeout.
    #[error("think timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The cancellation handle fired before a reply landed.
    #[error("think canceled")]
    Canceled,

    /// The provider refused the content.
    #[error("blocked by provider policy: {reason}")]
    PolicyBlocked { reason: String },
}

impl ThinkError {
    /// Whether the adapter may retry this error internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Stable wire code for error replies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "AGENT_TIMEOUT",
            Self::Timeout { .. } => "AGENT_TIMEOUT",
            Self::Permanent { .. } => "AGENT_PERMANENT",
            Self::PolicyBlocked { .. } => "AGENT_PERMANENT",
            Self::Canceled => "AGENT_TIMEOUT",
        }
    }

    /// Map an HTTP status into the taxonomy.
    pub fn from_http_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Permanent {
                message: format!("authentication failed ({status}): {message}"),
            },
            404 => Self::Permanent {
                message: format!("model or endpoint not found: {message}"),
            },
            429 => Self::Transient {
                message: format!("rate limited: {message}"),
            },
            s if s >= 500 => Self::Transient {
                message: format!("server error ({s}): {message}"),
            },
            s if s >= 400 => Self::Permanent {
                message: format!("invalid request ({s}): {message}"),
            },
            s => Self::Transient {
                message: format!("unexpected status {s}: {message}"),
            },
        }
    }

    /// Map a reqwest transport error into the taxonomy.
    pub fn from_transport(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_ms }
        } else if err.is_connect() || err.is_request() {
            Self::Transient {
                message: err.to_string(),
            }
        } else {
            Self::Permanent {
                message: err.to_string(),
            }
        }
    }
}
