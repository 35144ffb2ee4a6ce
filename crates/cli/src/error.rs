//! Error types for the pkgpulse fetch layer

use std::sync::Arc;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Fetch layer errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Core error: {0}")]
    Core(#[from] pkgpulse_core::Error),

    #[error("Warehouse query failed: {0}")]
    UpstreamQuery(String),

    #[error("HTTP {} from {url}: {message}", status_label(.status))]
    UpstreamHttp {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Request to {url} timed out")]
    UpstreamTimeout { url: String },

    #[error("Stargazer pagination stopped after {max_pages} pages; star history is truncated")]
    PaginationLimitExceeded { max_pages: u32 },

    #[error("Could not parse GitHub repository from: {0}")]
    InvalidRepository(String),

    #[error("Invalid credentials: {0}")]
    Credentials(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token signing error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// An error handed out by the cache to every waiter of a failed load
    #[error(transparent)]
    Shared(#[from] Arc<Error>),
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "error".to_string(), |s| s.to_string())
}

impl Error {
    /// Classify a transport error, separating timeouts from other failures
    pub fn from_transport(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout {
                url: url.to_string(),
            }
        } else {
            Self::UpstreamHttp {
                url: url.to_string(),
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }

    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UpstreamTimeout { .. } => true,
            Self::UpstreamHttp { status, .. } => status.map_or(true, |s| s >= 500 || s == 429),
            Self::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
