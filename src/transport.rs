//! The outbound request interface shared by every layer.
//!
//! A [`Transport`] turns a [`Request`] into a `reqwest::Response`. The base
//! [`HttpTransport`] does the network I/O; decorators such as authentication
//! and retry wrap another transport and add behavior around it.

use crate::{Context, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Sends one request and returns the response, whatever its status.
///
/// Non-2xx statuses are not errors at this level; only failures to obtain a
/// response are. Implementations must observe the context's cancellation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, ctx: &Context, request: Request) -> Result<reqwest::Response>;
}

/// A transport shared between clients and decorators.
pub type SharedTransport = Arc<dyn Transport>;

type BodyFactory = Arc<dyn Fn() -> Bytes + Send + Sync>;

/// A request body that knows whether it can be sent more than once.
///
/// Bodies built from in-memory data are replayable: each retry obtains a fresh
/// copy. [`Body::once`] marks a body that may only be sent a single time, so
/// requests carrying it are never retried.
#[derive(Default)]
pub struct Body {
    inner: BodyInner,
}

#[derive(Default)]
enum BodyInner {
    #[default]
    Empty,
    Once(Bytes),
    Replayable(BodyFactory),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A body that cannot be regenerated for a retry.
    pub fn once(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: BodyInner::Once(bytes.into()),
        }
    }

    /// A body regenerated by `factory` on every attempt.
    pub fn from_fn<F>(factory: F) -> Self
    where
        F: Fn() -> Bytes + Send + Sync + 'static,
    {
        Self {
            inner: BodyInner::Replayable(Arc::new(factory)),
        }
    }

    /// Serializes `value` as JSON into a replayable body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        Ok(Self::from(bytes))
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        match &self.inner {
            BodyInner::Empty => true,
            BodyInner::Once(bytes) => bytes.is_empty(),
            BodyInner::Replayable(_) => false,
        }
    }

    /// Whether this body can be sent again on a retry.
    pub fn is_replayable(&self) -> bool {
        self.is_empty() || matches!(self.inner, BodyInner::Replayable(_))
    }

    /// Returns a fresh, unconsumed copy, or `None` for a one-shot body.
    pub fn try_clone(&self) -> Option<Self> {
        let inner = match &self.inner {
            BodyInner::Empty => BodyInner::Empty,
            BodyInner::Once(bytes) if bytes.is_empty() => BodyInner::Empty,
            BodyInner::Once(_) => return None,
            BodyInner::Replayable(factory) => BodyInner::Replayable(Arc::clone(factory)),
        };
        Some(Self { inner })
    }

    /// Consumes the body, producing the bytes to put on the wire.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self.inner {
            BodyInner::Empty => None,
            BodyInner::Once(bytes) => Some(bytes),
            BodyInner::Replayable(factory) => Some(factory()),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::from_fn(move || bytes.clone())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from(Bytes::from_static(text.as_bytes()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            BodyInner::Empty => f.write_str("Body::Empty"),
            BodyInner::Once(bytes) => write!(f, "Body::Once({} bytes)", bytes.len()),
            BodyInner::Replayable(_) => f.write_str("Body::Replayable"),
        }
    }
}

/// An outbound HTTP request.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    /// A request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers, for layers that stamp them.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The request body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Consumes the request, returning its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Copies the request with a fresh body, or `None` if the body is one-shot.
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
        })
    }

    fn into_reqwest(self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method, self.url);
        *request.headers_mut() = self.headers;
        *request.body_mut() = self.body.into_bytes().map(reqwest::Body::from);
        request
    }
}

/// The base transport: sends requests over the network with `reqwest`.
///
/// Connection pooling, TLS and DNS are left to the wrapped `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Sends through `client`, sharing its connection pool.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, ctx: &Context, request: Request) -> Result<reqwest::Response> {
        tracing::trace!(
            method = %request.method(),
            url = %request.url(),
            "Sending HTTP request"
        );
        let response = ctx.run(self.client.execute(request.into_reqwest())).await??;
        Ok(response)
    }
}
