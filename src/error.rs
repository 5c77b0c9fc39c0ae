use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Statuses the origin uses for throttling or transient overload.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("{url} returned an empty body")]
    EmptyPayload { url: String },

    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch failed for {url} after {attempts} attempts")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                source,
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }

    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Connectivity, throttling and empty bodies are transient; everything
    /// else (4xx, local I/O) will not improve by asking again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::EmptyPayload { .. } => true,
            Self::HttpStatus { status, .. } => RETRYABLE_STATUSES.contains(&status.as_u16()),
            Self::Io { .. } | Self::Exhausted { .. } => false,
        }
    }

    /// The innermost failure, looking through `Exhausted`.
    pub fn last_cause(&self) -> &FetchError {
        match self {
            Self::Exhausted { last, .. } => last.last_cause(),
            other => other,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self.last_cause() {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
