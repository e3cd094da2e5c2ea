//! Fixed-window rate limiting on top of the cache store.
//!
//! A window opens with the first request for a key and lasts exactly
//! `window`; the expiry is written atomically with that first increment and
//! never renewed. When the store is unavailable every request is admitted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::error::ErrorReport;

use super::client::CacheClient;
use super::keys::rate_key;

const METRIC_RATE_LIMIT_REJECTED: &str = "cachefront_rate_limit_rejected_total";
const FORWARDED_FOR: &str = "x-forwarded-for";
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Outcome of one `check_and_consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
}

impl RateDecision {
    fn open(limit: u32) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    client: Arc<CacheClient>,
}

impl RateLimiter {
    pub fn new(client: Arc<CacheClient>) -> Self {
        Self { client }
    }

    /// Count one request against `key` and decide whether it is admitted.
    ///
    /// `remaining = max(0, limit - count)` and `allowed = count <= limit`.
    /// A store failure admits the request with `remaining = limit`.
    pub async fn check_and_consume(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let Some(count) = self.client.incr_with_ttl(&rate_key(key), 1, window).await else {
            return RateDecision::open(limit);
        };

        let count = u64::try_from(count).unwrap_or(0);
        let limit_wide = u64::from(limit);
        RateDecision {
            allowed: count <= limit_wide,
            remaining: u32::try_from(limit_wide.saturating_sub(count)).unwrap_or(0),
            limit,
        }
    }
}

/// Per-route policy handed to [`rate_limit_layer`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: RateLimiter,
    pub policy: RateLimitPolicy,
}

#[derive(Debug, Serialize)]
struct RateLimitedBody {
    error: RateLimitedMessage,
}

#[derive(Debug, Serialize)]
struct RateLimitedMessage {
    code: &'static str,
    message: &'static str,
    hint: String,
}

/// Axum middleware enforcing the policy per client address and route.
///
/// Attach with `route_layer` so the matched route template, not the raw
/// path, forms part of the key.
pub async fn rate_limit_layer(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let client = client_identity(&request);
    let identity = format!("{client}:{route}");

    let decision = state
        .limiter
        .check_and_consume(&identity, state.policy.limit, state.policy.window)
        .await;

    if !decision.allowed {
        warn!(
            target = "cachefront::rate_limit",
            client = %client,
            route = %route,
            limit = decision.limit,
            "rate limit exceeded"
        );
        counter!(METRIC_RATE_LIMIT_REJECTED).increment(1);
        return rate_limited(decision, state.policy.window);
    }

    debug!(client = %client, route = %route, remaining = decision.remaining, "rate limit passed");
    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), decision);
    response
}

fn client_identity(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: RateDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
}

fn rate_limited(decision: RateDecision, window: Duration) -> Response {
    let retry_after = window.as_secs().max(1);
    let body = RateLimitedBody {
        error: RateLimitedMessage {
            code: "rate_limited",
            message: "Rate limit exceeded",
            hint: format!("Retry after {retry_after} seconds"),
        },
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_headers(response.headers_mut(), decision);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    ErrorReport::from_message(
        "cache::rate_limit",
        StatusCode::TOO_MANY_REQUESTS,
        format!("rate_limited: retry_after={retry_after}"),
    )
    .attach(&mut response);
    response
}
