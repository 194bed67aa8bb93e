//! Automatic retries with exponential backoff.
//!
//! [`RetryTransport`] re-sends a request when the server answers 429, or
//! 502/503/504 for a method that is safe to repeat. It never retries a
//! transport error, a request whose body cannot be replayed, or an attempt
//! cancelled by the caller's [`Context`].
//!
//! The delay before the next attempt is the server's `Retry-After` for a 429,
//! otherwise `base_delay * 2^(attempt - 1)` capped at `max_delay` and passed
//! through the policy's jitter function.

use crate::middleware::Middleware;
use crate::rate_limit::parse_retry_after;
use crate::transport::{Request, SharedTransport, Transport};
use crate::{Context, Result};
use async_trait::async_trait;
use http::{Method, StatusCode};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// At most this many bytes are read from a discarded response body.
const DRAIN_LIMIT: usize = 4096;

/// Randomizes a computed backoff delay.
pub type Jitter = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Full jitter: a uniformly random duration in `[0, delay]`.
pub fn full_jitter(delay: Duration) -> Duration {
    let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
}

/// How many times to try a request and how long to wait in between.
///
/// # Examples
///
/// ```
/// use crm_client::RetryPolicy;
/// use std::time::Duration;
///
/// // 5 attempts: waits of up to 200ms, 400ms, 800ms, 1s
/// let policy = RetryPolicy::default()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200))
///     .max_delay(Duration::from_secs(1));
///
/// // Deterministic delays
/// let fixed = policy.clone().jitter(|d| d);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with every attempt.
    pub base_delay: Duration,
    /// Upper bound for the computed delay. Zero means `base_delay`.
    pub max_delay: Duration,
    /// Applied to every computed delay. `None` leaves delays unchanged.
    pub jitter: Option<Jitter>,
    /// Retry 502/503/504 for non-idempotent methods too.
    pub retry_all_methods: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: Some(Arc::new(full_jitter) as Jitter),
            retry_all_methods: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that sends exactly one attempt.
    pub fn none() -> Self {
        Self::default().max_attempts(1)
    }

    /// Sets the total number of attempts, the first one included.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the cap on the computed backoff delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Replaces the function applied to every computed delay.
    pub fn jitter<F>(mut self, jitter: F) -> Self
    where
        F: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        self.jitter = Some(Arc::new(jitter) as Jitter);
        self
    }

    /// Allows retrying 502/503/504 for non-idempotent methods.
    pub fn retry_all_methods(mut self, enabled: bool) -> Self {
        self.retry_all_methods = enabled;
        self
    }

    /// Normalizes the policy before use.
    ///
    /// `max_attempts` is at least 1 and a zero `max_delay` becomes
    /// `base_delay`. A zero `base_delay` is kept, which disables backoff.
    pub fn sanitize(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if self.max_delay.is_zero() {
            self.max_delay = self.base_delay;
        }
        self
    }

    /// Exponential backoff for `attempt` (1-based), capped and jittered.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match &self.jitter {
            Some(jitter) => jitter(delay),
            None => delay,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter.is_some())
            .field("retry_all_methods", &self.retry_all_methods)
            .finish()
    }
}

/// Methods defined to be safe to repeat.
fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

/// Whether the response to `attempt` warrants another try.
fn should_retry(
    policy: &RetryPolicy,
    attempt: u32,
    method: &Method,
    status: StatusCode,
    replayable: bool,
) -> bool {
    if attempt >= policy.max_attempts || !replayable {
        return false;
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            policy.retry_all_methods || is_idempotent(method)
        }
        _ => false,
    }
}

/// How long to wait after `response` before sending attempt `attempt + 1`.
fn retry_delay(policy: &RetryPolicy, attempt: u32, response: &reqwest::Response) -> Duration {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(response.headers());
        if !retry_after.is_zero() {
            return retry_after;
        }
    }
    policy.backoff(attempt)
}

/// Reads and discards up to [`DRAIN_LIMIT`] bytes so the connection can be
/// reused, then drops the response.
async fn drain(mut response: reqwest::Response) {
    let mut read = 0;
    while read < DRAIN_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => read += chunk.len(),
            _ => break,
        }
    }
}

/// The number of attempts it took to produce a response.
///
/// Stored in the extensions of every response returned by [`RetryTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempts(pub u32);

/// Adds a [`RetryTransport`] to a middleware chain.
#[derive(Debug, Clone, Default)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    /// Wraps transports in a [`RetryTransport`] using `policy` by default.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Middleware for RetryLayer {
    fn wrap(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(RetryTransport::new(next, self.policy.clone()))
    }
}

/// Retries requests that failed with a transient status.
///
/// The transport keeps no state between calls besides its default policy, so
/// one instance can serve any number of concurrent requests. Per-call
/// [`CallOptions`](crate::CallOptions) on the [`Context`] can disable retries
/// or replace the policy.
pub struct RetryTransport {
    next: SharedTransport,
    policy: RetryPolicy,
}

impl RetryTransport {
    /// Retries requests sent to `next` according to `policy`.
    pub fn new(next: SharedTransport, policy: RetryPolicy) -> Self {
        Self { next, policy }
    }

    /// The default policy, used when a call carries no override.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn send_once(&self, ctx: &Context, request: Request) -> Result<reqwest::Response> {
        let mut response = self.next.send(ctx, request).await?;
        response.extensions_mut().insert(Attempts(1));
        Ok(response)
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn send(&self, ctx: &Context, request: Request) -> Result<reqwest::Response> {
        let options = ctx.options();
        let policy = options
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.policy.clone())
            .sanitize();

        if options.no_retry || policy.max_attempts <= 1 {
            return self.send_once(ctx, request).await;
        }

        // A one-shot body can only ever be sent once.
        if !request.body().is_replayable() {
            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                "Request body is not replayable; retries disabled"
            );
            return self.send_once(ctx, request).await;
        }

        let method = request.method().clone();
        for attempt in 1..policy.max_attempts {
            let Some(outgoing) = request.try_clone() else {
                break;
            };

            tracing::debug!(
                method = %method,
                url = %request.url(),
                attempt = attempt,
                max_attempts = policy.max_attempts,
                "Sending attempt"
            );
            let mut response = self.next.send(ctx, outgoing).await?;
            let status = response.status();

            if !should_retry(&policy, attempt, &method, status, true) {
                response.extensions_mut().insert(Attempts(attempt));
                return Ok(response);
            }

            let delay = retry_delay(&policy, attempt, &response);
            tracing::warn!(
                status = status.as_u16(),
                method = %method,
                url = %request.url(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying request after delay"
            );

            ctx.run(drain(response)).await?;
            ctx.sleep(delay).await?;
        }

        // Final attempt: whatever it produces is returned as-is.
        let mut response = self.next.send(ctx, request).await?;
        response
            .extensions_mut()
            .insert(Attempts(policy.max_attempts));
        Ok(response)
    }
}
