//! Error types for CRM API calls.
//!
//! Every failure a caller can observe is one [`Error`]. Non-2xx responses are
//! classified into [`ApiError`], with HTTP 429 specialized as
//! [`RateLimitError`] so callers can read the server's retry guidance.

use crate::rate_limit::RateLimit;
use http::StatusCode;
use std::fmt;
use std::time::Duration;

/// A non-2xx response from the API, decoded as far as the body allows.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// The HTTP status code.
    pub status: StatusCode,
    /// Provider-specific error code, if the body carried one.
    pub code: Option<String>,
    /// Human readable message.
    ///
    /// Taken from the body's `message` field, then its `error` field, and
    /// finally the status code's canonical reason.
    pub message: String,
    /// Structured detail from the body's `error_info` field.
    pub details: Option<serde_json::Value>,
    /// The raw response body.
    pub body: String,
    /// Correlation id from the `X-Request-Id` response header.
    pub request_id: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error {}", self.status)?;
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(id) = &self.request_id {
            write!(f, " (request id {})", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// An HTTP 429 response together with the parsed rate-limit headers.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    /// The generic API error view of the response.
    pub api: ApiError,
    /// Rate-limit headers. Absent or malformed values are zero.
    pub rate_limit: RateLimit,
}

impl RateLimitError {
    /// How long the server asked us to wait. Zero when it gave no guidance.
    pub fn retry_after(&self) -> Duration {
        self.rate_limit.retry_after
    }
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate limited: {} (retry after {:?}, {}/{} remaining)",
            self.api.message,
            self.rate_limit.retry_after,
            self.rate_limit.remaining,
            self.rate_limit.limit
        )
    }
}

impl std::error::Error for RateLimitError {}

/// The main error type for CRM API calls.
///
/// # Examples
///
/// ```no_run
/// use crm_client::{Client, Context, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
/// let ctx = Context::new();
///
/// match client.get::<serde_json::Value>(&ctx, "/v1/contacts/42").await {
///     Ok(response) => println!("Contact: {:?}", response.data),
///     Err(Error::RateLimited(err)) => {
///         eprintln!("Slow down, retry in {:?}", err.retry_after());
///     }
///     Err(Error::Api(err)) => eprintln!("API said no: {}", err),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection failed, DNS lookup failed, etc.).
    ///
    /// These are surfaced immediately and never retried.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The caller's context was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// The caller's context deadline passed.
    ///
    /// The deadline bounds the whole operation, including retries and the
    /// sleeps between them.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The server returned a non-2xx status other than 429.
    #[error("{0}")]
    Api(ApiError),

    /// The server returned HTTP 429.
    #[error("{0}")]
    RateLimited(RateLimitError),

    /// Failed to deserialize a 2xx response body into the expected type.
    ///
    /// Decoding errors are never retried.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// A credential could not be obtained. The request was not sent.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(err) => Some(err.status),
            Error::RateLimited(err) => Some(err.api.status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::Network(err) => err.status(),
            _ => None,
        }
    }

    /// Returns the API error for any classified non-2xx response.
    ///
    /// Rate-limit errors are a specialization of API errors, so this returns
    /// `Some` for both [`Error::Api`] and [`Error::RateLimited`].
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            Error::RateLimited(err) => Some(&err.api),
            _ => None,
        }
    }

    /// Returns the parsed rate-limit headers for a 429 response.
    pub fn rate_limit(&self) -> Option<&RateLimit> {
        match self {
            Error::RateLimited(err) => Some(&err.rate_limit),
            _ => None,
        }
    }

    /// Returns the server's retry guidance for a 429 response.
    pub fn retry_after(&self) -> Option<Duration> {
        self.rate_limit().map(|rl| rl.retry_after)
    }

    /// Returns the correlation id the server attached to a failed response.
    pub fn request_id(&self) -> Option<&str> {
        self.api_error()?.request_id.as_deref()
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Api(err) => Some(&err.body),
            Error::RateLimited(err) => Some(&err.api.body),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns `true` if the caller's context ended the operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// A specialized `Result` type for CRM API calls.
pub type Result<T> = std::result::Result<T, Error>;
