//! Rate-limit header parsing.
//!
//! The API reports its quota through `Retry-After`, `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset`. Parsing never fails: a
//! missing or malformed header reads as zero.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Resets above this value are Unix milliseconds rather than seconds.
const RESET_MILLIS_THRESHOLD: u64 = 10_000_000_000;

/// Rate-limit state reported by the server on a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// How long to wait before retrying (from `Retry-After`).
    pub retry_after: Duration,

    /// Requests allowed in the current window (from `X-RateLimit-Limit`).
    pub limit: u64,

    /// Requests remaining in the current window (from `X-RateLimit-Remaining`).
    pub remaining: u64,

    /// When the current window resets (from `X-RateLimit-Reset`).
    pub reset: Option<SystemTime>,
}

impl RateLimit {
    /// Extracts rate-limit information from response headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use crm_client::rate_limit::RateLimit;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    /// headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
    /// headers.insert("x-ratelimit-limit", "not-a-number".parse().unwrap());
    ///
    /// let info = RateLimit::from_headers(&headers);
    /// assert_eq!(info.retry_after, Duration::from_secs(60));
    /// assert_eq!(info.limit, 0);
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: parse_retry_after(headers),
            limit: parse_u64(headers, "x-ratelimit-limit"),
            remaining: parse_u64(headers, "x-ratelimit-remaining"),
            reset: parse_rate_limit_reset(headers),
        }
    }

    /// Returns how long a caller should wait before trying again.
    ///
    /// Prefers `retry_after`, then falls back to the time left until `reset`.
    /// Returns zero when neither says to wait.
    pub fn suggested_wait(&self) -> Duration {
        if !self.retry_after.is_zero() {
            return self.retry_after;
        }

        self.reset
            .and_then(|reset| reset.duration_since(SystemTime::now()).ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Parses the Retry-After header.
///
/// Supports both delay-seconds (integer) and HTTP-date formats. A date in the
/// past, or anything unparsable, yields zero.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Duration {
    let Some(header) = headers
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    else {
        return Duration::ZERO;
    };

    if let Ok(seconds) = header.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    httpdate::parse_http_date(header)
        .ok()
        .and_then(|at| at.duration_since(SystemTime::now()).ok())
        .unwrap_or(Duration::ZERO)
}

/// Parses X-RateLimit-Reset as Unix seconds or milliseconds.
fn parse_rate_limit_reset(headers: &HeaderMap) -> Option<SystemTime> {
    match parse_u64(headers, "x-ratelimit-reset") {
        0 => None,
        ms if ms > RESET_MILLIS_THRESHOLD => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
    }
}

fn parse_u64(headers: &HeaderMap, name: &str) -> u64 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}
