use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failure of one call to the ingestion API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Rate limiting, 5xx, timeouts and dropped connections.
    #[error("transient upload failure: {reason}")]
    Transient {
        reason: String,
        /// Server-provided minimum wait (`Retry-After`).
        retry_after: Option<Duration>,
    },

    /// Rejected request or a response we cannot interpret.
    #[error("permanent upload failure: {0}")]
    Permanent(String),
}

impl UploadError {
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Permanent(_) => None,
        }
    }

    pub fn from_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> Self {
        let reason = if body.trim().is_empty() {
            format!("http {status}")
        } else {
            format!("http {status}: {}", truncate(body.trim(), 200))
        };
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient {
                reason,
                retry_after,
            }
        } else {
            Self::Permanent(reason)
        }
    }

    pub fn from_reqwest_error(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient {
                reason: err.to_string(),
                retry_after: None,
            }
        } else if err.is_decode() {
            Self::Permanent(format!("undecodable response: {err}"))
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
