//! Composition of transport decorators.
//!
//! A [`Middleware`] takes the next transport and returns one that wraps it.
//! [`chain`] folds an ordered list of them around a base transport: the first
//! middleware listed is the outermost, so it runs first on the way out and
//! last on the way back.

use crate::transport::{Request, SharedTransport, Transport};
use crate::{Context, Error, Result};
use async_trait::async_trait;
use http::header::USER_AGENT;
use http::HeaderValue;
use std::sync::Arc;

/// Wraps a transport in another one.
///
/// Closures of type `Fn(SharedTransport) -> SharedTransport` are middleware.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: SharedTransport) -> SharedTransport;
}

impl<F> Middleware for F
where
    F: Fn(SharedTransport) -> SharedTransport + Send + Sync,
{
    fn wrap(&self, next: SharedTransport) -> SharedTransport {
        self(next)
    }
}

/// Builds a single transport from `base` and the decorators around it.
///
/// `chain(base, &[a, b])` sends through `a`, then `b`, then `base`. An empty
/// list returns `base` unchanged.
///
/// # Examples
///
/// ```
/// use crm_client::middleware::{chain, Middleware, UserAgentLayer};
/// use crm_client::retry::{RetryLayer, RetryPolicy};
/// use crm_client::transport::{HttpTransport, SharedTransport};
/// use std::sync::Arc;
///
/// let base: SharedTransport = Arc::new(HttpTransport::default());
/// let layers: Vec<Arc<dyn Middleware>> = vec![
///     Arc::new(UserAgentLayer::new("my-app/1.0").unwrap()),
///     Arc::new(RetryLayer::new(RetryPolicy::default())),
/// ];
/// let transport = chain(base, &layers);
/// ```
pub fn chain(base: SharedTransport, middleware: &[Arc<dyn Middleware>]) -> SharedTransport {
    middleware
        .iter()
        .rev()
        .fold(base, |next, layer| layer.wrap(next))
}

/// Sets the `User-Agent` header on requests that do not already carry one.
#[derive(Debug, Clone)]
pub struct UserAgentLayer {
    user_agent: HeaderValue,
}

impl UserAgentLayer {
    /// # Errors
    ///
    /// Returns an error if `user_agent` is not a valid header value.
    pub fn new(user_agent: impl AsRef<str>) -> Result<Self> {
        let user_agent = HeaderValue::try_from(user_agent.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid user agent: {}", e)))?;
        Ok(Self { user_agent })
    }
}

impl Middleware for UserAgentLayer {
    fn wrap(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(UserAgentTransport {
            next,
            user_agent: self.user_agent.clone(),
        })
    }
}

/// Transport produced by [`UserAgentLayer`].
pub struct UserAgentTransport {
    next: SharedTransport,
    user_agent: HeaderValue,
}

#[async_trait]
impl Transport for UserAgentTransport {
    async fn send(&self, ctx: &Context, mut request: Request) -> Result<reqwest::Response> {
        request
            .headers_mut()
            .entry(USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());
        self.next.send(ctx, request).await
    }
}
