//! Integration tests using wiremock to simulate the CRM API.

use async_trait::async_trait;
use crm_client::middleware::Middleware;
use crm_client::transport::{Body, Request, SharedTransport, Transport};
use crm_client::{
    Client, Context, Credential, Error, RequestMetadata, RetryPolicy,
};
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Contact {
    id: u32,
    email: String,
}

fn contact(id: u32) -> Contact {
    Contact {
        id,
        email: format!("user{}@example.com", id),
    }
}

/// Short, deterministic backoff so retry tests run quickly.
fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(20))
        .jitter(|d| d)
}

fn client_for(server: &MockServer, policy: RetryPolicy) -> Client {
    Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(policy)
        .build()
        .unwrap()
}

/// Responds with `statuses[n]` on the n-th call, then 200 with `body`.
fn sequence(
    statuses: Vec<u16>,
    body: serde_json::Value,
    counter: Arc<AtomicUsize>,
) -> impl Fn(&MockRequest) -> ResponseTemplate {
    move |_: &MockRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        match statuses.get(n) {
            Some(status) => ResponseTemplate::new(*status),
            None => ResponseTemplate::new(200).set_body_json(&body),
        }
    }
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(contact(1))
                .insert_header("x-request-id", "req-1"),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let response = client
        .get::<Contact>(&Context::new(), "/contacts/1")
        .await
        .unwrap();

    assert_eq!(response.data, contact(1));
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.request_id(), Some("req-1"));
    assert!(!response.was_retried());
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/contacts"))
        .and(header("content-type", "application/json"))
        .and(body_json(contact(0)))
        .respond_with(ResponseTemplate::new(201).set_body_json(contact(7)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let response = client
        .post::<_, Contact>(&Context::new(), "/contacts", &contact(0))
        .await
        .unwrap();

    assert_eq!(response.data.id, 7);
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_base_url_path_prefix_is_kept() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/contacts/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(contact(1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(format!("{}/crm/v3", mock_server.uri()))
        .unwrap()
        .build()
        .unwrap();

    client
        .get::<Contact>(&Context::new(), "/contacts/1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_auth_and_user_agent_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer s3cret"))
        .and(header("user-agent", "crm-tests/1.0"))
        .and(header("x-tenant", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(contact(1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .bearer_token(Credential::new("s3cret"))
        .user_agent("crm-tests/1.0")
        .default_header("x-tenant", "acme")
        .unwrap()
        .build()
        .unwrap();

    client.get::<Contact>(&Context::new(), "/me").await.unwrap();
}

#[tokio::test]
async fn test_retries_transient_failures_then_succeeds() {
    let mock_server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(sequence(
            vec![503, 503],
            serde_json::json!(contact(1)),
            counter.clone(),
        ))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3));
    let response = client
        .get::<Contact>(&Context::new(), "/contacts/1")
        .await
        .unwrap();

    assert_eq!(response.data, contact(1));
    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_return_last_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(
            ResponseTemplate::new(502).set_body_json(serde_json::json!({
                "code": "UPSTREAM",
                "message": "bad gateway"
            })),
        )
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3));
    let err = client
        .get::<Contact>(&Context::new(), "/contacts/1")
        .await
        .unwrap_err();

    let api = err.api_error().unwrap();
    assert_eq!(api.status.as_u16(), 502);
    assert_eq!(api.code.as_deref(), Some("UPSTREAM"));
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let mock_server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let calls = counter.clone();

    Mock::given(method("GET"))
        .and(path("/deals"))
        .respond_with(move |_: &MockRequest| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "1")
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!([]))
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(2));
    let start = Instant::now();
    let response = client
        .get::<Vec<Contact>>(&Context::new(), "/deals")
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_rate_limit_error_exposes_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/deals"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .insert_header("x-ratelimit-limit", "100")
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-request-id", "req-429")
                .set_body_json(serde_json::json!({ "message": "slow down" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3));
    let ctx = Context::new().without_retry();
    let err = client.get::<Contact>(&ctx, "/deals").await.unwrap_err();

    let Error::RateLimited(rl) = &err else {
        panic!("expected RateLimited, got {:?}", err);
    };
    assert_eq!(rl.retry_after(), Duration::from_secs(30));
    assert_eq!(rl.rate_limit.limit, 100);
    assert_eq!(rl.rate_limit.remaining, 0);
    assert_eq!(rl.api.message, "slow down");
    assert_eq!(err.request_id(), Some("req-429"));
}

#[tokio::test]
async fn test_no_retry_override_sends_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(5));
    let ctx = Context::new().without_retry();
    let err = client
        .get::<Contact>(&ctx, "/contacts/1")
        .await
        .unwrap_err();

    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
}

#[tokio::test]
async fn test_policy_override_replaces_default() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(ResponseTemplate::new(504))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(5));
    let ctx = Context::new().with_retry_policy(fast_policy(2));
    let err = client
        .get::<Contact>(&ctx, "/contacts/1")
        .await
        .unwrap_err();

    assert_eq!(err.status().map(|s| s.as_u16()), Some(504));
}

#[tokio::test]
async fn test_post_is_not_retried_on_5xx() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/contacts"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3));
    let err = client
        .post::<_, Contact>(&Context::new(), "/contacts", &contact(0))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api(_)));
}

#[tokio::test]
async fn test_post_retried_when_all_methods_allowed() {
    let mock_server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/contacts"))
        .and(body_json(contact(0)))
        .respond_with(sequence(
            vec![503],
            serde_json::json!(contact(9)),
            counter.clone(),
        ))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3).retry_all_methods(true));
    let response = client
        .post::<_, Contact>(&Context::new(), "/contacts", &contact(0))
        .await
        .unwrap();

    assert_eq!(response.data.id, 9);
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_one_shot_body_is_sent_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/files/upload"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3));
    let url = client.base_url().join("/files/upload").unwrap();
    let request =
        Request::new(Method::PUT, url).with_body(Body::once(b"streamed bytes".to_vec()));

    let response = client.send(&Context::new(), request).await.unwrap();

    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/404"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("x-request-id", "req-404")
                .set_body_json(serde_json::json!({
                    "error": "not found",
                    "error_info": { "id": 404 }
                })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, fast_policy(3));
    let err = client
        .get::<Contact>(&Context::new(), "/contacts/404")
        .await
        .unwrap_err();

    let api = err.api_error().unwrap();
    assert_eq!(api.message, "not found");
    assert_eq!(api.details, Some(serde_json::json!({ "id": 404 })));
    assert_eq!(api.request_id.as_deref(), Some("req-404"));
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"not-a-number"}"#))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let err = client
        .get::<Contact>(&Context::new(), "/contacts/1")
        .await
        .unwrap_err();

    match err {
        Error::DeserializationFailed {
            raw_response,
            status,
            ..
        } => {
            assert_eq!(raw_response, r#"{"id":"not-a-number"}"#);
            assert_eq!(status.as_u16(), 200);
        }
        other => panic!("expected DeserializationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_deadline_exceeded_during_slow_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(contact(1))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let ctx = Context::new().with_timeout(Duration::from_millis(100));
    let err = client.get::<Contact>(&ctx, "/slow").await.unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn test_cancelled_context_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let token = CancellationToken::new();
    token.cancel();
    let ctx = Context::new().with_cancellation(token);

    let err = client
        .get::<Contact>(&ctx, "/contacts/1")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_retrying() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let policy = RetryPolicy::default()
        .max_attempts(3)
        .base_delay(Duration::from_secs(5))
        .max_delay(Duration::from_secs(5))
        .jitter(|d| d);
    let client = client_for(&mock_server, policy);

    let ctx = Context::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let err = client
        .get::<Contact>(&ctx, "/contacts/1")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_pager_walks_all_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contacts"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [contact(3)],
            "next_cursor": "c3"
        })))
        .with_priority(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contacts"))
        .and(query_param("cursor", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [],
            "next_cursor": null
        })))
        .with_priority(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contacts"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [contact(1), contact(2)],
            "next_cursor": "c2"
        })))
        .with_priority(10)
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let ctx = Context::new();
    let mut pager =
        client.pager::<Contact>(RequestMetadata::get("/contacts").with_query_param("limit", "2"));

    let mut ids = Vec::new();
    let mut pages = 0;
    while pager.advance(&ctx).await {
        pages += 1;
        ids.extend(pager.items().iter().map(|c| c.id));
    }

    assert!(pager.error().is_none());
    assert_eq!(pages, 3);
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_pager_stops_on_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/deals"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "code": "TOKEN_EXPIRED",
            "message": "token expired"
        })))
        .with_priority(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [contact(1)],
            "next": "c2"
        })))
        .with_priority(10)
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, RetryPolicy::default());
    let ctx = Context::new();
    let mut pager = client.pager::<Contact>(RequestMetadata::get("/deals"));

    assert!(pager.advance(&ctx).await);
    assert_eq!(pager.items().len(), 1);
    assert!(!pager.advance(&ctx).await);
    assert!(!pager.advance(&ctx).await);

    let err = pager.error().unwrap();
    assert_eq!(
        err.api_error().and_then(|e| e.code.as_deref()),
        Some("TOKEN_EXPIRED")
    );
}

/// Counts every request that reaches it.
struct Counting {
    next: SharedTransport,
    seen: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for Counting {
    async fn send(
        &self,
        ctx: &Context,
        request: Request,
    ) -> crm_client::Result<reqwest::Response> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        self.next.send(ctx, request).await
    }
}

#[tokio::test]
async fn test_extra_middleware_sees_every_attempt() {
    let mock_server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/contacts/1"))
        .respond_with(sequence(
            vec![503],
            serde_json::json!(contact(1)),
            counter.clone(),
        ))
        .mount(&mock_server)
        .await;

    let seen = Arc::new(AtomicUsize::new(0));
    let layer_seen = seen.clone();
    let counting = move |next: SharedTransport| -> SharedTransport {
        Arc::new(Counting {
            next,
            seen: layer_seen.clone(),
        })
    };
    fn assert_middleware<M: Middleware>(_: &M) {}
    assert_middleware(&counting);

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_policy(fast_policy(3))
        .middleware(counting)
        .build()
        .unwrap();

    let response = client
        .get::<Contact>(&Context::new(), "/contacts/1")
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
