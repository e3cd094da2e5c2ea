use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    routing::get,
};
use cachefront::cache::{
    CacheClient, InvalidationState, KvStore, MemoryStore, RateLimitPolicy, RateLimitState,
    RateLimiter, ResponseCacheState, StoreError, invalidate_cache_layer, rate_limit_layer,
    response_cache_layer,
};
use metrics_util::debugging::{DebuggingRecorder, Snapshotter};
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

struct RefusingStore;

#[async_trait]
impl KvStore for RefusingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn incr_by(&self, _key: &str, _delta: i64) -> Result<i64, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn incr_with_ttl(&self, _key: &str, _delta: i64, _ttl: Duration) -> Result<i64, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn delete_pattern(&self, _pattern: &str) -> Result<u64, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
    fn backend_name(&self) -> &'static str {
        "refusing"
    }
}

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn recorded_names(snapshotter: &Snapshotter) -> HashSet<String> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, _)| key.key().name().to_string())
        .collect()
}

fn router(client: Arc<CacheClient>, limit: u32) -> Router {
    let cache = ResponseCacheState::new(client.clone(), Duration::from_secs(30), 4096);
    let invalidation = InvalidationState::new(client.clone(), ["cache:/things*"]);
    let rate_limit = RateLimitState {
        limiter: RateLimiter::new(client),
        policy: RateLimitPolicy {
            limit,
            window: Duration::from_secs(60),
        },
    };

    Router::new()
        .route(
            "/things",
            get(|| async { Json(json!({ "things": [] })) })
                .route_layer(middleware::from_fn_with_state(cache, response_cache_layer))
                .merge(
                    axum::routing::post(|| async { StatusCode::NO_CONTENT }).route_layer(
                        middleware::from_fn_with_state(invalidation, invalidate_cache_layer),
                    ),
                ),
        )
        .route_layer(middleware::from_fn_with_state(rate_limit, rate_limit_layer))
}

async fn call(app: &Router, method: Method) -> StatusCode {
    let request = Request::builder()
        .method(method)
        .uri("/things")
        .body(Body::empty())
        .expect("request should build");
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
        .status()
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let snapshotter = snapshotter();
    let client = Arc::new(CacheClient::with_store(
        Arc::new(MemoryStore::new()),
        Duration::from_millis(250),
    ));
    let app = router(client, 2);

    assert_eq!(call(&app, Method::GET).await, StatusCode::OK);
    settle().await;
    assert_eq!(call(&app, Method::GET).await, StatusCode::OK);
    assert_eq!(call(&app, Method::POST).await, StatusCode::TOO_MANY_REQUESTS);

    let names = recorded_names(snapshotter);
    for expected in [
        "cachefront_response_cache_total",
        "cachefront_rate_limit_rejected_total",
    ] {
        assert!(
            names.contains(expected),
            "expected metric {expected} to be recorded, got {names:?}"
        );
    }
}

#[tokio::test]
#[serial]
async fn store_failures_are_counted() {
    let snapshotter = snapshotter();
    let client = Arc::new(CacheClient::with_store(
        Arc::new(RefusingStore),
        Duration::from_millis(250),
    ));
    let app = router(client, 10);

    assert_eq!(call(&app, Method::GET).await, StatusCode::OK);
    assert_eq!(call(&app, Method::POST).await, StatusCode::NO_CONTENT);
    settle().await;

    let names = recorded_names(snapshotter);
    for expected in [
        "cachefront_store_op_failed_total",
        "cachefront_invalidation_total",
    ] {
        assert!(
            names.contains(expected),
            "expected metric {expected} to be recorded, got {names:?}"
        );
    }
}
