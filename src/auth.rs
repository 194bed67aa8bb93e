//! Credential stamping.
//!
//! An [`AuthProvider`] adds credential headers to an outbound request. Every
//! provider here leaves a header alone if the caller already set it, so
//! per-request overrides win. [`AuthLayer`] runs a provider in the transport
//! chain; a provider failure aborts the send before any network I/O.

use crate::middleware::Middleware;
use crate::transport::{Request, SharedTransport, Transport};
use crate::{Context, Error, Result};
use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;

/// An opaque secret such as an API token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wraps a secret.
    pub fn new(secret: impl AsRef<str>) -> Self {
        Self(Arc::from(secret.as_ref()))
    }

    /// The secret itself. Keep it out of logs.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Supplies a credential on demand, e.g. by refreshing an OAuth token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, ctx: &Context) -> Result<Credential>;
}

#[async_trait]
impl TokenSource for Credential {
    async fn token(&self, _ctx: &Context) -> Result<Credential> {
        Ok(self.clone())
    }
}

/// Adds zero or more credential headers to a request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn apply(&self, ctx: &Context, request: &mut Request) -> Result<()>;
}

fn header_value(value: &str, secret: bool) -> Result<HeaderValue> {
    let mut value = HeaderValue::try_from(value)
        .map_err(|e| Error::Auth(format!("credential is not a valid header value: {}", e)))?;
    value.set_sensitive(secret);
    Ok(value)
}

/// `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerAuth {
    source: Arc<dyn TokenSource>,
}

impl BearerAuth {
    /// Uses a fixed credential.
    pub fn new(credential: Credential) -> Self {
        Self::from_source(Arc::new(credential))
    }

    /// Asks `source` for a token on every request that needs one.
    pub fn from_source(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl AuthProvider for BearerAuth {
    async fn apply(&self, ctx: &Context, request: &mut Request) -> Result<()> {
        if request.headers().contains_key(AUTHORIZATION) {
            return Ok(());
        }
        let token = self.source.token(ctx).await?;
        let value = header_value(&format!("Bearer {}", token.expose()), true)?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// A credential sent verbatim in a named header, e.g. `X-Api-Key`.
#[derive(Debug, Clone)]
pub struct HeaderAuth {
    name: HeaderName,
    credential: Credential,
}

impl HeaderAuth {
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid header name.
    pub fn new(name: impl AsRef<str>, credential: Credential) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        Ok(Self { name, credential })
    }
}

#[async_trait]
impl AuthProvider for HeaderAuth {
    async fn apply(&self, _ctx: &Context, request: &mut Request) -> Result<()> {
        if request.headers().contains_key(&self.name) {
            return Ok(());
        }
        let value = header_value(self.credential.expose(), true)?;
        request.headers_mut().insert(self.name.clone(), value);
        Ok(())
    }
}

/// Applies several providers in order, stopping at the first error.
#[derive(Clone, Default)]
pub struct CompositeAuth {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl CompositeAuth {
    /// Applies `providers` in order.
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self { providers }
    }

    /// Appends a provider.
    pub fn with(mut self, provider: impl AuthProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }
}

#[async_trait]
impl AuthProvider for CompositeAuth {
    async fn apply(&self, ctx: &Context, request: &mut Request) -> Result<()> {
        for provider in &self.providers {
            provider.apply(ctx, request).await?;
        }
        Ok(())
    }
}

/// Runs an [`AuthProvider`] on every request passing through the chain.
#[derive(Clone)]
pub struct AuthLayer {
    provider: Arc<dyn AuthProvider>,
}

impl AuthLayer {
    /// Authenticates every request with `provider`.
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }
}

impl Middleware for AuthLayer {
    fn wrap(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(AuthTransport {
            provider: Arc::clone(&self.provider),
            next,
        })
    }
}

/// Transport produced by [`AuthLayer`].
pub struct AuthTransport {
    provider: Arc<dyn AuthProvider>,
    next: SharedTransport,
}

#[async_trait]
impl Transport for AuthTransport {
    async fn send(&self, ctx: &Context, mut request: Request) -> Result<reqwest::Response> {
        if let Err(e) = self.provider.apply(ctx, &mut request).await {
            tracing::warn!(error = %e, url = %request.url(), "Failed to authenticate request");
            return Err(e);
        }
        self.next.send(ctx, request).await
    }
}
