use thiserror::Error;

/// Result type for netdispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised synchronously while configuring a client or building a request.
///
/// Anything that goes wrong once a request is in flight is reported through
/// the handle's failure callback as a [`DomainError`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from the underlying reqwest client
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Multipart form data errors
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// Invalid request configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new multipart error
    pub fn multipart(message: impl Into<String>) -> Self {
        Error::Multipart(message.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Get the underlying reqwest error if this is a network error
    pub fn as_network_error(&self) -> Option<&reqwest::Error> {
        match self {
            Error::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Error::InvalidRequest(format!("Invalid header name: {}", err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidRequest(format!("Invalid header value: {}", err))
    }
}

/// Error value delivered to a request's failure callback.
///
/// Transport failures carry the HTTP status (or `-1` when there is none);
/// envelope failures carry the code embedded in the response payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{description} (code {code})")]
pub struct DomainError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable description
    pub description: String,
}

impl DomainError {
    /// Code used when no status or envelope code is available
    pub const UNKNOWN_CODE: i64 = -1;

    /// Create a new domain error
    pub fn new(code: i64, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// HTTP status code error
#[derive(Error, Debug)]
pub enum StatusError {
    /// Client error (4xx status codes)
    #[error("Client error: {status} - {message}")]
    Client { status: http::StatusCode, message: String },

    /// Server error (5xx status codes)
    #[error("Server error: {status} - {message}")]
    Server { status: http::StatusCode, message: String },

    /// Unexpected status code
    #[error("Unexpected status: {status} - {message}")]
    Unexpected { status: http::StatusCode, message: String },
}

impl StatusError {
    /// Classify a non-success status
    pub fn from_status(status: http::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if status.is_client_error() {
            StatusError::Client { status, message }
        } else if status.is_server_error() {
            StatusError::Server { status, message }
        } else {
            StatusError::Unexpected { status, message }
        }
    }

    /// Get the status code
    pub fn status(&self) -> http::StatusCode {
        match self {
            StatusError::Client { status, .. } => *status,
            StatusError::Server { status, .. } => *status,
            StatusError::Unexpected { status, .. } => *status,
        }
    }

    /// Check if this is a client error
    pub fn is_client_error(&self) -> bool {
        matches!(self, StatusError::Client { .. })
    }

    /// Check if this is a server error
    pub fn is_server_error(&self) -> bool {
        matches!(self, StatusError::Server { .. })
    }
}
