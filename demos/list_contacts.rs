//! Example walking every contact with the cursor pager.
//!
//! Reads the API location and token from the environment:
//!
//! ```text
//! CRM_API_URL=https://api.example.com/crm/v3 CRM_API_TOKEN=... \
//!     cargo run --example list_contacts
//! ```

use crm_client::{ClientBuilder, Context, RequestMetadata};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Contact {
    id: String,
    email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crm_client=info".into()),
        )
        .init();

    let client = ClientBuilder::from_env()?
        .timeout(Duration::from_secs(15))
        .build()?;

    // The whole listing must finish within two minutes.
    let ctx = Context::new().with_timeout(Duration::from_secs(120));

    let metadata = RequestMetadata::get("/contacts").with_query_param("limit", "100");
    let mut pager = client.pager::<Contact>(metadata);

    let mut total = 0;
    let mut pages = 0;
    while pager.advance(&ctx).await {
        pages += 1;
        for contact in pager.items() {
            println!("{:<24} {}", contact.id, contact.email.as_deref().unwrap_or("-"));
        }
        total += pager.items().len();
    }

    if let Some(err) = pager.error() {
        eprintln!("Listing stopped after {} page(s): {}", pages, err);
        if let Some(request_id) = err.request_id() {
            eprintln!("  request id: {}", request_id);
        }
        return Err(format!("listing failed: {}", err).into());
    }

    println!("{} contact(s) across {} page(s)", total, pages);
    Ok(())
}
