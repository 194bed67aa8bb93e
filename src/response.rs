//! Decoded API responses.

use crate::rate_limit::RateLimit;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// A 2xx response decoded into `T`, with what the client learned sending it.
///
/// Dereferences to `T`.
///
/// ```no_run
/// use crm_client::{Client, Context};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Contact {
///     email: String,
/// }
///
/// # async fn example() -> Result<(), crm_client::Error> {
/// # let client = Client::builder().base_url("https://api.example.com")?.build()?;
/// let contact = client.get::<Contact>(&Context::new(), "/contacts/42").await?;
///
/// println!("{} in {:?}", contact.email, contact.latency);
/// if contact.was_retried() {
///     println!("took {} attempts (request {:?})", contact.attempts, contact.request_id());
/// }
/// if contact.rate_limit().remaining == 0 {
///     println!("quota exhausted until {:?}", contact.rate_limit().reset);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub data: T,

    /// The body exactly as received.
    pub raw_body: String,

    pub status: StatusCode,

    pub headers: HeaderMap,

    /// From the first attempt until the body was read, backoff included.
    pub latency: Duration,

    /// Attempts the retry transport made, 1 if it made no retries.
    pub attempts: u32,
}

impl<T> Response<T> {
    /// Assembles a response from its parts.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Replaces the decoded value, keeping everything else.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        let Response {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        } = self;
        Response::new(f(data), raw_body, status, headers, latency, attempts)
    }

    /// Discards the metadata.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Whether more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// A header value, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The server's correlation id for this request.
    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER).filter(|id| !id.is_empty())
    }

    /// Quota information the server attached to this response.
    ///
    /// Fields are zero (or `None`) when the headers are absent.
    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::from_headers(&self.headers)
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
