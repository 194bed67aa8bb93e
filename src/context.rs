//! Per-call context: cancellation, deadline and call options.
//!
//! A [`Context`] travels with one logical call through every transport layer.
//! Options set on it (disabling retries, replacing the retry policy) affect
//! that call only; the transports themselves hold no per-call state.

use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call overrides consulted by the retry transport.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Send exactly one attempt regardless of the response.
    pub no_retry: bool,

    /// Replaces the transport's default policy for this call.
    ///
    /// The override is used as-is, it is not merged with the default.
    pub retry_policy: Option<RetryPolicy>,
}

/// Cancellation signal, deadline and options for one logical call.
///
/// Cloning is cheap, clones share the same cancellation token.
///
/// # Examples
///
/// ```
/// use crm_client::{Context, RetryPolicy};
/// use std::time::Duration;
///
/// let ctx = Context::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_retry_policy(RetryPolicy::default().max_attempts(5));
///
/// let once = ctx.clone().without_retry();
/// assert!(once.options().no_retry);
/// assert!(!ctx.options().no_retry);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    options: CallOptions,
}

impl Context {
    /// Creates a context with no deadline and default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `token` as this call's cancellation signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Bounds the call to end `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Bounds the call to end at `deadline`.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Disables automatic retries for this call.
    pub fn without_retry(mut self) -> Self {
        self.options.no_retry = true;
        self
    }

    /// Replaces the transport's retry policy for this call.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = Some(policy);
        self
    }

    /// Returns a context that is cancelled with this one but can also be
    /// cancelled on its own. Deadline and options are inherited.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            options: self.options.clone(),
        }
    }

    /// The per-call overrides consulted by the retry transport.
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// When this call must be finished by, if bounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The token that cancels this call. Cancel it to stop the call from elsewhere.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the error describing why this context is done, if it is.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Sleeps for `duration`, waking early with an error on cancellation or
    /// when the deadline passes.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Drives `future` to completion unless the context ends first.
    pub async fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = deadline => Err(Error::DeadlineExceeded),
            output = future => Ok(output),
        }
    }
}
