// src/error.rs

//! Unified error handling for the sync engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// A classified remote API failure.
///
/// Carries enough detail (status, message, endpoint) for a UI layer to render
/// a single notification line. `Clone` so that one shared in-flight request
/// can hand the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status, `None` for transport failures before a response arrived
    pub status: Option<u16>,
    pub message: String,
    pub endpoint: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Transport-level failure (no status code).
    pub fn transport(message: impl fmt::Display, endpoint: impl Into<String>) -> Self {
        Self::new(None, message.to_string(), endpoint)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} {} ({})", status, self.message, self.endpoint),
            None => write!(f, "{} ({})", self.message, self.endpoint),
        }
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request could not be sent
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Push stream failure
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Remote API answered with an error or could not be reached
    #[error("API error: {0}")]
    Api(ApiError),

    /// 429 on an endpoint; callers should cool down instead of retrying
    #[error("Rate limited on {endpoint}")]
    RateLimited { endpoint: String },

    /// Recent 403/404 on the same GET; not re-issued until the window elapses
    #[error("Request to {endpoint} suppressed for another {remaining_secs}s after {status}")]
    Suppressed {
        endpoint: String,
        status: u16,
        remaining_secs: i64,
    },

    /// Payload did not have the expected shape
    #[error("Malformed payload: {0}")]
    Payload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a malformed-payload error.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => err.status,
            Self::RateLimited { .. } => Some(429),
            Self::Suppressed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the caller should lengthen its polling interval.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        match err.status {
            Some(429) => Self::RateLimited {
                endpoint: err.endpoint,
            },
            _ => Self::Api(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
