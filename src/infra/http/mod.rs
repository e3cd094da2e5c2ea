//! HTTP surface: posts API wired through the cache layer.
//!
//! Anonymous reads go through the shared response cache, per-user reads
//! through a user-keyed one, and every mutation purges `cache:/api/posts*`
//! after it succeeds. All `/api` routes are rate limited per client and route.

mod middleware;
mod posts;

pub use middleware::{RequestContext, USER_ID_HEADER};

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::{
    application::{engagement::EngagementService, repos::PostsRepo},
    cache::{
        CacheClient, CacheConfig, InvalidationState, RESPONSE_PREFIX, RateLimitPolicy,
        RateLimitState, RateLimiter, ResponseCacheOptions, ResponseCacheState,
        invalidate_cache_layer, rate_limit_layer, response_cache_layer,
    },
};

use self::middleware::{extract_viewer, log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub engagement: Arc<EngagementService>,
    pub db: Arc<dyn PostsRepo>,
    pub cache: Arc<CacheClient>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    database: bool,
    cache: &'static str,
}

pub fn build_router(state: HttpState, config: &CacheConfig) -> Router {
    let shared_cache = ResponseCacheState::new(
        state.cache.clone(),
        config.response_ttl,
        config.response_max_body_bytes,
    );
    let per_user_cache = shared_cache.clone().with_options(ResponseCacheOptions {
        allow_authenticated: true,
        vary_by_user: true,
    });
    let invalidation =
        InvalidationState::new(state.cache.clone(), [format!("{RESPONSE_PREFIX}/api/posts*")]);
    let rate_limit = RateLimitState {
        limiter: RateLimiter::new(state.cache.clone()),
        policy: RateLimitPolicy {
            limit: config.rate_limit_max_requests,
            window: config.rate_limit_window,
        },
    };

    let cached = from_fn_with_state(shared_cache, response_cache_layer);
    let cached_per_user = from_fn_with_state(per_user_cache, response_cache_layer);
    let invalidating = from_fn_with_state(invalidation, invalidate_cache_layer);

    let api = Router::new()
        .route(
            "/api/posts",
            get(posts::list_posts)
                .route_layer(cached.clone())
                .merge(post(posts::create_post).route_layer(invalidating.clone())),
        )
        .route("/api/posts/{id}", get(posts::get_post).route_layer(cached))
        .route("/api/posts/{id}/views", post(posts::record_view))
        .route(
            "/api/posts/{id}/like",
            get(posts::like_status)
                .route_layer(cached_per_user)
                .merge(
                    post(posts::like_post)
                        .delete(posts::unlike_post)
                        .route_layer(invalidating),
                ),
        )
        .route_layer(from_fn_with_state(rate_limit, rate_limit_layer));

    Router::new()
        .route("/_health", get(health))
        .merge(api)
        .with_state(state)
        .layer(from_fn(log_responses))
        .layer(from_fn(extract_viewer))
        .layer(from_fn(set_request_context))
}

/// Database reachability decides the status; the cache only reports.
async fn health(State(state): State<HttpState>) -> Response {
    let database = state.db.health_check().await.is_ok();
    let cache = if !state.cache.is_ready() {
        "disabled"
    } else if state.cache.ping().await {
        "ok"
    } else {
        "unreachable"
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let report = HealthReport {
        status: if database { "ok" } else { "degraded" },
        database,
        cache,
    };
    (status, Json(report)).into_response()
}
