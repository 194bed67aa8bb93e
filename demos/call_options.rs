//! Example demonstrating per-call retry overrides, deadlines and error
//! classification.
//!
//! Run with: `CRM_API_URL=https://api.example.com cargo run --example call_options`

use crm_client::{ClientBuilder, Context, Error, RetryPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("crm_client=debug")
        .init();

    let client = ClientBuilder::from_env()?
        .retry_policy(
            RetryPolicy::default()
                .max_attempts(4)
                .base_delay(Duration::from_millis(250))
                .max_delay(Duration::from_secs(5)),
        )
        .build()?;

    println!("=== Example 1: Default policy ===");
    report(
        client
            .get::<serde_json::Value>(&Context::new(), "/pipelines")
            .await,
    );

    println!("\n=== Example 2: No retries for a health probe ===");
    let ctx = Context::new().without_retry();
    report(client.get::<serde_json::Value>(&ctx, "/health").await);

    println!("\n=== Example 3: A more patient policy for one call ===");
    let ctx = Context::new().with_retry_policy(
        RetryPolicy::default()
            .max_attempts(8)
            .max_delay(Duration::from_secs(30)),
    );
    report(client.get::<serde_json::Value>(&ctx, "/exports/latest").await);

    println!("\n=== Example 4: Deadline across all attempts ===");
    let ctx = Context::new().with_timeout(Duration::from_secs(2));
    report(client.get::<serde_json::Value>(&ctx, "/reports/slow").await);

    println!("\n=== Example 5: Cancellation from another task ===");
    let token = CancellationToken::new();
    let ctx = Context::new().with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    report(client.get::<serde_json::Value>(&ctx, "/reports/slow").await);

    Ok(())
}

fn report(result: crm_client::Result<crm_client::Response<serde_json::Value>>) {
    match result {
        Ok(response) => {
            println!(
                "OK {} after {} attempt(s) in {:?}",
                response.status, response.attempts, response.latency
            );
        }
        Err(Error::RateLimited(err)) => {
            println!("Rate limited: {}", err);
            println!("  wait at least {:?}", err.rate_limit.suggested_wait());
        }
        Err(Error::Api(err)) => {
            println!("API error {}: {}", err.status, err.message);
            if let Some(code) = &err.code {
                println!("  code: {}", code);
            }
            if let Some(details) = &err.details {
                println!("  details: {}", details);
            }
        }
        Err(e) if e.is_cancellation() => println!("Stopped: {}", e),
        Err(e) => println!("Failed: {}", e),
    }
}
