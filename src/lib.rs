//! # crm-client - A resilient HTTP client for a CRM REST API
//!
//! `crm-client` wraps `reqwest` in a small stack of composable transports:
//! authentication, a user agent, and automatic retries with backoff, all
//! driven by a per-call [`Context`] that carries cancellation, a deadline and
//! retry overrides. Non-2xx responses are classified into typed errors, and
//! list endpoints are walked with a lazy cursor [`Pager`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use crm_client::{Client, Context, Credential, RequestMetadata, RetryPolicy};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Contact {
//!     id: String,
//!     email: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), crm_client::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/crm/v3")?
//!         .bearer_token(Credential::new("secret-token"))
//!         .retry_policy(
//!             RetryPolicy::default()
//!                 .max_attempts(4)
//!                 .base_delay(Duration::from_millis(200)),
//!         )
//!         .build()?;
//!
//!     let ctx = Context::new().with_timeout(Duration::from_secs(30));
//!
//!     let contact = client.get::<Contact>(&ctx, "/contacts/42").await?;
//!     println!("{} ({} attempt(s))", contact.data.email, contact.attempts);
//!
//!     let mut pager = client.pager::<Contact>(RequestMetadata::get("/contacts"));
//!     while pager.advance(&ctx).await {
//!         for contact in pager.items() {
//!             println!("{}", contact.id);
//!         }
//!     }
//!     if let Some(err) = pager.error() {
//!         eprintln!("listing stopped: {}", err);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Composable transports** - Every layer implements [`transport::Transport`]; [`middleware::chain`] stacks them
//! - **Retries that are safe by default** - Only idempotent methods with replayable bodies are retried on 429/5xx
//! - **Per-call overrides** - Disable or replace the retry policy for a single call through its [`Context`]
//! - **Cancellation and deadlines** - Checked before every attempt and during every backoff wait
//! - **Typed errors** - [`ApiError`] and [`RateLimitError`] keep the status, error code, request id and raw body
//! - **Cursor pagination** - [`Pager`] fetches one page at a time and stops at the first error
//! - **Structured logging** - Attempts, retries and failures are reported through `tracing`
//!
//! ## Error Handling
//!
//! ```no_run
//! use crm_client::{Client, Context, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.get::<serde_json::Value>(&Context::new(), "/deals/7").await {
//!     Ok(response) => println!("Deal: {:?}", response.data),
//!     Err(Error::RateLimited(err)) => {
//!         eprintln!("Rate limited; retry after {:?}", err.retry_after());
//!     }
//!     Err(Error::Api(err)) => {
//!         eprintln!("API error {} {:?}: {}", err.status, err.code, err.message);
//!     }
//!     Err(e) if e.is_cancellation() => eprintln!("Gave up: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Per-call Overrides
//!
//! ```no_run
//! use crm_client::{Client, Context, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), crm_client::Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! // Fail fast on a health probe.
//! let ctx = Context::new().without_retry();
//! client.get::<serde_json::Value>(&ctx, "/health").await?;
//!
//! // Be more patient with a bulk export.
//! let ctx = Context::new().with_retry_policy(
//!     RetryPolicy::default()
//!         .max_attempts(8)
//!         .max_delay(Duration::from_secs(60)),
//! );
//! client.get::<serde_json::Value>(&ctx, "/exports/latest").await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod classify;
mod client;
mod context;
mod error;
pub mod metadata;
pub mod middleware;
pub mod pager;
pub mod rate_limit;
mod response;
pub mod retry;
pub mod transport;

pub use auth::Credential;
pub use client::{Client, ClientBuilder, ENV_API_TOKEN, ENV_API_URL};
pub use context::{CallOptions, Context};
pub use error::{ApiError, Error, RateLimitError, Result};
pub use metadata::RequestMetadata;
pub use pager::{Page, Pager};
pub use response::Response;
pub use retry::RetryPolicy;
