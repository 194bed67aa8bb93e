//! Turns non-2xx responses into typed errors.

use crate::error::{ApiError, RateLimitError};
use crate::rate_limit::RateLimit;
use crate::Error;
use http::{HeaderMap, StatusCode};
use serde_json::Value;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fields of the error envelope. The API uses either `code`/`message` or
/// `error`/`error_info`; each field is read on its own so one field of an
/// unexpected type does not hide the others.
#[derive(Debug, Default)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
    error_info: Option<Value>,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        Self {
            code: fields.remove("code").and_then(code_to_string),
            message: fields.remove("message").and_then(non_empty_string),
            error: fields.remove("error").and_then(non_empty_string),
            error_info: fields.remove("error_info").filter(|v| !v.is_null()),
        }
    }
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn code_to_string(code: Value) -> Option<String> {
    match code {
        Value::Number(n) => Some(n.to_string()),
        other => non_empty_string(other),
    }
}

/// Builds the error for a non-2xx response from its parts.
///
/// Never fails: a body that is not JSON, or headers that do not parse, just
/// leave the corresponding fields empty.
///
/// # Examples
///
/// ```
/// use crm_client::{classify::classify, Error};
/// use http::{HeaderMap, StatusCode};
///
/// let err = classify(
///     StatusCode::NOT_FOUND,
///     &HeaderMap::new(),
///     r#"{"code":"NOT_FOUND","message":"contact 42 does not exist"}"#.to_string(),
/// );
/// let api = err.api_error().unwrap();
/// assert_eq!(api.code.as_deref(), Some("NOT_FOUND"));
/// assert_eq!(api.message, "contact 42 does not exist");
/// ```
pub fn classify(status: StatusCode, headers: &HeaderMap, body: String) -> Error {
    let parsed = ErrorBody::parse(&body);

    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let api = ApiError {
        status,
        code: parsed.code,
        message,
        details: parsed.error_info,
        body,
        request_id,
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited(RateLimitError {
            api,
            rate_limit: RateLimit::from_headers(headers),
        })
    } else {
        Error::Api(api)
    }
}

/// Reads the body of a non-2xx response and classifies it.
///
/// A body that cannot be read is treated as empty.
pub async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();

    if status.is_client_error() {
        tracing::error!(status = status.as_u16(), response = %body, "Client error (4xx)");
    } else if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), response = %body, "Server error (5xx)");
    }

    classify(status, &headers, body)
}
