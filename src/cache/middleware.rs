//! Response cache middleware.
//!
//! Serves successful JSON GET responses from the cache store and records
//! fresh ones on a miss. Mutating routes are paired with
//! [`invalidate_cache_layer`], the only active invalidation path; everything
//! else ages out through its TTL.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::application::error::HttpError;

use super::client::{CacheClient, spawn_detached};
use super::keys::{entity_tag, if_none_match_matches, response_key};

const SOURCE: &str = "cache::middleware";
const METRIC_RESPONSE_CACHE: &str = "cachefront_response_cache_total";
const METRIC_INVALIDATION: &str = "cachefront_invalidation_total";
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");
pub const CACHE_KEY_HEADER: HeaderName = HeaderName::from_static("x-cache-key");

/// Authenticated caller, inserted into request extensions by auth glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
}

/// Custom key derivation; must be deterministic in the request target.
pub type KeyGenerator = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCacheOptions {
    /// Cache requests that carry a [`Viewer`].
    pub allow_authenticated: bool,
    /// Suffix keys with `:user=<id>` when a viewer is present.
    pub vary_by_user: bool,
}

#[derive(Clone)]
pub struct ResponseCacheState {
    client: Arc<CacheClient>,
    ttl: Duration,
    max_body_bytes: usize,
    key_generator: Option<KeyGenerator>,
    options: ResponseCacheOptions,
}

impl ResponseCacheState {
    pub fn new(client: Arc<CacheClient>, ttl: Duration, max_body_bytes: usize) -> Self {
        Self {
            client,
            ttl,
            max_body_bytes,
            key_generator: None,
            options: ResponseCacheOptions::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = Some(generator);
        self
    }

    pub fn with_options(mut self, options: ResponseCacheOptions) -> Self {
        self.options = options;
        self
    }

    fn key_for(&self, request: &Request<Body>, viewer: Option<&Viewer>) -> String {
        if let Some(generator) = &self.key_generator {
            return generator(request);
        }
        let user = viewer
            .filter(|_| self.options.vary_by_user)
            .map(|viewer| viewer.user_id.as_str());
        response_key(request.uri().path(), request.uri().query(), user)
    }
}

/// Stored form of a cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRecord {
    status: u16,
    content_type: String,
    /// Handler headers replayed on a hit, minus framing and cache metadata.
    #[serde(default)]
    headers: Vec<(String, String)>,
    body: String,
}

/// Per-response metadata echoed to clients.
///
/// `etag` and `ttl` are only set when the body is, or was just, stored.
struct CacheMeta<'a> {
    outcome: &'static str,
    key: &'a str,
    etag: Option<&'a str>,
    ttl: Option<Duration>,
    private: bool,
}

impl CacheMeta<'_> {
    fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(self.outcome));
        if let Ok(value) = HeaderValue::from_str(self.key) {
            headers.insert(CACHE_KEY_HEADER, value);
        }
        if let Some(etag) = self.etag
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            headers.insert(header::ETAG, value);
        }
        // A handler's own freshness directive wins.
        if let Some(ttl) = self.ttl
            && !headers.contains_key(header::CACHE_CONTROL)
        {
            let scope = if self.private { "private" } else { "public" };
            if let Ok(value) = HeaderValue::from_str(&format!("{scope}, max-age={}", ttl.as_secs())) {
                headers.insert(header::CACHE_CONTROL, value);
            }
        }
    }
}

/// Outcome of reading a handler body under the size limit.
enum Buffered {
    Complete(Bytes),
    /// Limit exceeded; the bytes read so far are chained back in front of
    /// the unread remainder.
    Oversized(Body),
    Failed(axum::Error),
}

/// Middleware for response caching.
///
/// Bypasses non-GET requests, authenticated requests unless allowed, and
/// requests arriving while the store is detached. Handler errors pass
/// through untouched; only 2xx JSON bodies are stored.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return bypass(request, next, "method").await;
    }

    let viewer = request.extensions().get::<Viewer>().cloned();
    if viewer.is_some() && !cache.options.allow_authenticated {
        return bypass(request, next, "authenticated").await;
    }

    if !cache.client.is_ready() {
        return bypass(request, next, "store_not_ready").await;
    }

    let key = cache.key_for(&request, viewer.as_ref());
    let private = viewer.is_some();

    if let Some(record) = lookup(&cache.client, &key).await {
        let etag = entity_tag(&key, record.body.as_bytes());
        let meta = CacheMeta {
            outcome: "HIT",
            key: &key,
            etag: Some(&etag),
            ttl: Some(cache.ttl),
            private,
        };

        let revalidated = request
            .headers()
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| if_none_match_matches(value, &etag));

        if revalidated {
            debug!(cache = "response", outcome = "not_modified", key = %key, "conditional hit");
            counter!(METRIC_RESPONSE_CACHE, "outcome" => "not_modified").increment(1);
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            replay_headers(&record.headers, response.headers_mut());
            meta.apply(response.headers_mut());
            return response;
        }

        debug!(cache = "response", outcome = "hit", key = %key, "serving cached response");
        counter!(METRIC_RESPONSE_CACHE, "outcome" => "hit").increment(1);
        return build_response(record, &meta);
    }

    debug!(cache = "response", outcome = "miss", key = %key, "cache miss, executing handler");
    counter!(METRIC_RESPONSE_CACHE, "outcome" => "miss").increment(1);

    let response = next.run(request).await;
    if !should_store_response(&response) {
        return response;
    }

    let unstored = CacheMeta {
        outcome: "MISS",
        key: &key,
        etag: None,
        ttl: None,
        private,
    };
    let (mut parts, body) = response.into_parts();

    let limit = u64::try_from(cache.max_body_bytes).unwrap_or(u64::MAX);
    let declared = declared_length(&parts.headers)
        .unwrap_or(0)
        .max(body.size_hint().lower());
    if declared > limit {
        debug!(key = %key, declared, "response exceeds cache body limit; streaming through");
        unstored.apply(&mut parts.headers);
        return Response::from_parts(parts, body);
    }

    let bytes = match buffer_body(body, cache.max_body_bytes).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Oversized(body) => {
            debug!(key = %key, "response exceeds cache body limit; streaming through");
            unstored.apply(&mut parts.headers);
            return Response::from_parts(parts, body);
        }
        Buffered::Failed(error) => {
            warn!(key = %key, error = %error, "handler response body failed");
            return HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Response could not be produced",
                &error,
            )
            .into_response();
        }
    };

    let Ok(text) = std::str::from_utf8(&bytes) else {
        debug!(key = %key, "response body is not utf-8; not caching");
        unstored.apply(&mut parts.headers);
        return Response::from_parts(parts, Body::from(bytes));
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let record = CachedRecord {
        status: parts.status.as_u16(),
        content_type,
        headers: replayable_headers(&parts.headers),
        body: text.to_string(),
    };

    let etag = entity_tag(&key, &bytes);
    CacheMeta {
        outcome: "MISS",
        key: &key,
        etag: Some(&etag),
        ttl: Some(cache.ttl),
        private,
    }
    .apply(&mut parts.headers);

    store_detached(cache.client.clone(), key, record, cache.ttl);
    Response::from_parts(parts, Body::from(bytes))
}

async fn bypass(request: Request<Body>, next: Next, reason: &'static str) -> Response {
    debug!(cache = "response", outcome = "bypass", reason, "skipping response cache");
    counter!(METRIC_RESPONSE_CACHE, "outcome" => "bypass").increment(1);
    next.run(request).await
}

async fn lookup(client: &CacheClient, key: &str) -> Option<CachedRecord> {
    let raw = client.get(key).await?;
    match serde_json::from_slice::<CachedRecord>(&raw) {
        Ok(record) => Some(record),
        Err(error) => {
            warn!(key = %key, error = %error, "discarding unreadable cache record");
            None
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Read `body` frame by frame, holding at most one frame beyond `limit`.
async fn buffer_body(mut body: Body, limit: usize) -> Buffered {
    let mut buffered = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => return Buffered::Failed(error),
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        buffered.extend_from_slice(&data);

        if buffered.len() > limit {
            let head = buffered.freeze();
            let rest = stream::once(async move { Ok::<_, axum::Error>(head) })
                .chain(body.into_data_stream());
            return Buffered::Oversized(Body::from_stream(rest));
        }
    }
    Buffered::Complete(buffered.freeze())
}

fn store_detached(client: Arc<CacheClient>, key: String, record: CachedRecord, ttl: Duration) {
    let payload = match serde_json::to_vec(&record) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(key = %key, error = %error, "failed to serialize cache record");
            return;
        }
    };

    spawn_detached("response_cache_store", async move {
        if client.set(&key, payload, ttl).await {
            debug!(key = %key, ttl_secs = ttl.as_secs(), "cached response");
        }
    });
}

/// Only successful JSON responses without cookies are stored.
pub fn should_store_response(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_json_content_type)
}

fn is_json_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json") || essence.ends_with("+json")
}

/// Headers worth replaying on a hit: not connection framing, not content
/// type (stored separately), not cookies, not our own metadata.
fn is_replayable(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
            | "content-type"
            | "set-cookie"
            | "etag"
            | "x-cache"
            | "x-cache-key"
    )
}

fn replayable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| is_replayable(name))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn replay_headers(stored: &[(String, String)], headers: &mut HeaderMap) {
    for (name, value) in stored {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
}

/// Build a response from a cached record.
fn build_response(record: CachedRecord, meta: &CacheMeta<'_>) -> Response {
    let status = StatusCode::from_u16(record.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(Bytes::from(record.body)));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    replay_headers(&record.headers, headers);
    if let Ok(value) = HeaderValue::from_str(&record.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    meta.apply(headers);
    response
}

// ============================================================================
// Invalidation
// ============================================================================

#[derive(Clone)]
pub struct InvalidationState {
    client: Arc<CacheClient>,
    patterns: Arc<[String]>,
}

impl InvalidationState {
    pub fn new<I, S>(client: Arc<CacheClient>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Purge matching response-cache entries after a successful mutation.
///
/// Runs after the handler; non-2xx responses leave the cache untouched. The
/// purge is detached and never delays the response.
pub async fn invalidate_cache_layer(
    State(state): State<InvalidationState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    if response.status().is_success() {
        for pattern in state.patterns.iter() {
            invalidate_detached(state.client.clone(), pattern.clone());
        }
    }

    response
}

/// Fire-and-forget purge of every key matching `pattern`.
pub fn invalidate_detached(client: Arc<CacheClient>, pattern: String) {
    spawn_detached("invalidate", async move {
        match client.delete_pattern(&pattern).await {
            Some(removed) => {
                debug!(pattern = %pattern, removed, "invalidated cache entries");
                counter!(METRIC_INVALIDATION, "outcome" => "ok").increment(1);
            }
            None => {
                warn!(pattern = %pattern, "cache invalidation skipped; entries will expire by ttl");
                counter!(METRIC_INVALIDATION, "outcome" => "failed").increment(1);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_response(status: StatusCode) -> Response {
        let mut response = (status, "{}").into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    #[test]
    fn stores_successful_json() {
        assert!(should_store_response(&json_response(StatusCode::OK)));
        assert!(should_store_response(&json_response(StatusCode::CREATED)));
    }

    #[test]
    fn skips_errors_and_cookies() {
        assert!(!should_store_response(&json_response(StatusCode::NOT_FOUND)));
        assert!(!should_store_response(&json_response(
            StatusCode::INTERNAL_SERVER_ERROR
        )));

        let mut with_cookie = json_response(StatusCode::OK);
        with_cookie
            .headers_mut()
            .insert(header::SET_COOKIE, HeaderValue::from_static("a=b"));
        assert!(!should_store_response(&with_cookie));
    }

    #[test]
    fn skips_non_json() {
        let response = (StatusCode::OK, "plain").into_response();
        assert!(!should_store_response(&response));
    }

    #[test]
    fn replay_skips_framing_and_cache_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ETAG, HeaderValue::from_static("W/\"old\""));
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=5"));
        headers.insert("x-upstream", HeaderValue::from_static("ledger"));

        let mut stored = replayable_headers(&headers);
        stored.sort();
        assert_eq!(
            stored,
            vec![
                ("cache-control".to_string(), "max-age=5".to_string()),
                ("x-upstream".to_string(), "ledger".to_string()),
            ]
        );
    }

    #[test]
    fn declared_length_reads_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4097"));
        assert_eq!(declared_length(&headers), Some(4097));
    }

    #[test]
    fn json_content_type_detection() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn default_key_varies_by_user_only_when_configured() {
        let state = ResponseCacheState::new(
            Arc::new(CacheClient::disabled()),
            Duration::from_secs(30),
            1024,
        );
        let request = Request::builder()
            .uri("/api/me?b=2&a=1")
            .body(Body::empty())
            .unwrap();
        let viewer = Viewer {
            user_id: "42".to_string(),
        };

        assert_eq!(
            state.key_for(&request, Some(&viewer)),
            "cache:/api/me?a=1&b=2"
        );

        let varying = state.with_options(ResponseCacheOptions {
            allow_authenticated: true,
            vary_by_user: true,
        });
        assert_eq!(
            varying.key_for(&request, Some(&viewer)),
            "cache:/api/me?a=1&b=2:user=42"
        );
        assert_eq!(varying.key_for(&request, None), "cache:/api/me?a=1&b=2");
    }

    #[test]
    fn custom_key_generator_wins() {
        let state = ResponseCacheState::new(
            Arc::new(CacheClient::disabled()),
            Duration::from_secs(30),
            1024,
        )
        .with_key_generator(Arc::new(|request: &Request<Body>| {
            format!("cache:custom{}", request.uri().path())
        }));
        let request = Request::builder().uri("/x?y=1").body(Body::empty()).unwrap();
        assert_eq!(state.key_for(&request, None), "cache:custom/x");
    }
}
