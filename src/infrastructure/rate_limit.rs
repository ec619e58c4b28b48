//! Per-client-IP token-bucket rate limiting (§6), an adapter-layer
//! concern implemented the same way as `security_headers_middleware`:
//! a plain async function over `Request`/`Next` wired in with
//! `axum::middleware::from_fn_with_state`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<IpAddr, Bucket>>,
    limit: u32,
    window: Duration,
}

struct Bucket {
    remaining: u32,
    window_started: Instant,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            limit: limit.max(1),
            window,
        }
    }

    /// Consumes one token for `ip`, resetting the bucket once `window`
    /// has elapsed since it was last reset. Returns the remaining token
    /// count on success, or the number of seconds until reset on refusal.
    fn check(&self, ip: IpAddr) -> Result<u32, u64> {
        let mut bucket = self.buckets.entry(ip).or_insert_with(|| Bucket {
            remaining: self.limit,
            window_started: Instant::now(),
        });

        if bucket.window_started.elapsed() >= self.window {
            bucket.remaining = self.limit;
            bucket.window_started = Instant::now();
        }

        if bucket.remaining == 0 {
            let retry_after = self.window.saturating_sub(bucket.window_started.elapsed());
            return Err(retry_after.as_secs().max(1));
        }

        bucket.remaining -= 1;
        Ok(bucket.remaining)
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match limiter.check(addr.ip()) {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                "x-ratelimit-limit",
                limiter.limit.to_string().parse().unwrap(),
            );
            headers.insert(
                "x-ratelimit-remaining",
                remaining.to_string().parse().unwrap(),
            );
            headers.insert(
                "x-ratelimit-window",
                limiter.window.as_secs().to_string().parse().unwrap(),
            );
            response
        }
        Err(retry_after) => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too many requests", "retryAfter": retry_after })),
            )
                .into_response();
            response.headers_mut().insert(
                "retry-after",
                retry_after.to_string().parse().unwrap(),
            );
            response.headers_mut().insert(
                "x-ratelimit-limit",
                limiter.limit.to_string().parse().unwrap(),
            );
            response.headers_mut().insert(
                "x-ratelimit-window",
                limiter.window.as_secs().to_string().parse().unwrap(),
            );
            response
        }
    }
}
