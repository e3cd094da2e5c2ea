use axum::{
    Json,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    application::{
        engagement::{LikeState, PostView},
        error::HttpError,
    },
    cache::Viewer,
    domain::entities::PostRecord,
};

use super::HttpState;

const SOURCE: &str = "infra::http::posts";

#[derive(Debug, Serialize)]
pub(super) struct PostList {
    posts: Vec<PostView>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreatePostRequest {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Serialize)]
pub(super) struct ViewRecorded {
    views: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct LikeStatus {
    liked: bool,
}

/// Rejects anonymous requests on routes that act for a user.
pub(super) struct RequireViewer(pub Viewer);

impl<S: Send + Sync> FromRequestParts<S> for RequireViewer {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Viewer>()
            .cloned()
            .map(RequireViewer)
            .ok_or_else(|| {
                HttpError::new(
                    SOURCE,
                    StatusCode::UNAUTHORIZED,
                    "Authentication required",
                    "request carries no viewer",
                )
            })
    }
}

pub(super) async fn list_posts(State(state): State<HttpState>) -> Result<Json<PostList>, HttpError> {
    let posts = state.engagement.list_posts().await?;
    Ok(Json(PostList { posts }))
}

pub(super) async fn get_post(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PostView>, HttpError> {
    Ok(Json(state.engagement.post(id).await?))
}

pub(super) async fn create_post(
    State(state): State<HttpState>,
    Json(request): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostRecord>), HttpError> {
    let post = state
        .engagement
        .create_post(&request.title, &request.body)
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub(super) async fn record_view(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ViewRecorded>, HttpError> {
    let views = state.engagement.record_view(id).await?;
    Ok(Json(ViewRecorded { views }))
}

pub(super) async fn like_status(
    State(state): State<HttpState>,
    RequireViewer(viewer): RequireViewer,
    Path(id): Path<Uuid>,
) -> Result<Json<LikeStatus>, HttpError> {
    let liked = state.engagement.has_liked(&viewer.user_id, id).await?;
    Ok(Json(LikeStatus { liked }))
}

pub(super) async fn like_post(
    State(state): State<HttpState>,
    RequireViewer(viewer): RequireViewer,
    Path(id): Path<Uuid>,
) -> Result<Json<LikeState>, HttpError> {
    Ok(Json(state.engagement.like(&viewer.user_id, id).await?))
}

pub(super) async fn unlike_post(
    State(state): State<HttpState>,
    RequireViewer(viewer): RequireViewer,
    Path(id): Path<Uuid>,
) -> Result<Json<LikeState>, HttpError> {
    Ok(Json(state.engagement.unlike(&viewer.user_id, id).await?))
}
