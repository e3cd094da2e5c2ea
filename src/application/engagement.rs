//! Post engagement: likes and views.
//!
//! The database is the system of record. Counters and like flags are read
//! through the cache mirror and re-derived from the repository whenever the
//! mirror answers "unknown".

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    application::repos::{CreatePostParams, PostsRepo, PostsWriteRepo, RepoError},
    cache::CounterStore,
    domain::entities::{CounterField, PostRecord, PostStats},
};

#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("post `{0}` not found")]
    PostNotFound(Uuid),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: PostRecord,
    pub stats: PostStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes: i64,
}

#[derive(Clone)]
pub struct EngagementService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    counters: CounterStore,
}

impl EngagementService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        counters: CounterStore,
    ) -> Self {
        Self {
            reader,
            writer,
            counters,
        }
    }

    pub async fn list_posts(&self) -> Result<Vec<PostView>, EngagementError> {
        let posts = self.reader.list_posts().await?;
        let mut views = Vec::with_capacity(posts.len());
        for post in posts {
            let stats = self.stats_for(post.id).await?;
            views.push(PostView { post, stats });
        }
        Ok(views)
    }

    pub async fn post(&self, id: Uuid) -> Result<PostView, EngagementError> {
        let post = self.require_post(id).await?;
        let stats = self.stats_for(id).await?;
        Ok(PostView { post, stats })
    }

    pub async fn create_post(&self, title: &str, body: &str) -> Result<PostRecord, EngagementError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(EngagementError::Validation("title must not be empty".into()));
        }

        let post = self
            .writer
            .create_post(CreatePostParams {
                title: title.to_string(),
                body: body.to_string(),
            })
            .await?;
        Ok(post)
    }

    pub async fn record_view(&self, id: Uuid) -> Result<i64, EngagementError> {
        self.require_post(id).await?;
        let total = self.writer.record_view(id).await?;
        self.mirror_delta(id, CounterField::Views, 1).await;
        Ok(total)
    }

    pub async fn like(&self, user_id: &str, id: Uuid) -> Result<LikeState, EngagementError> {
        self.require_post(id).await?;
        if self.writer.add_like(user_id, id).await? {
            self.mirror_delta(id, CounterField::Likes, 1).await;
        }
        self.counters
            .set_user_flag(user_id, &id.to_string(), true)
            .await;

        let likes = self.counter(id, CounterField::Likes).await?;
        Ok(LikeState { liked: true, likes })
    }

    pub async fn unlike(&self, user_id: &str, id: Uuid) -> Result<LikeState, EngagementError> {
        self.require_post(id).await?;
        if self.writer.remove_like(user_id, id).await? {
            self.mirror_delta(id, CounterField::Likes, -1).await;
        }
        self.counters
            .set_user_flag(user_id, &id.to_string(), false)
            .await;

        let likes = self.counter(id, CounterField::Likes).await?;
        Ok(LikeState {
            liked: false,
            likes,
        })
    }

    /// Whether `user_id` likes the post. A mirrored flag answers only "yes";
    /// everything else is confirmed against the repository.
    pub async fn has_liked(&self, user_id: &str, id: Uuid) -> Result<bool, EngagementError> {
        let subject = id.to_string();
        if self.counters.get_user_flag(user_id, &subject).await == Some(true) {
            return Ok(true);
        }

        let liked = self.reader.has_liked(user_id, id).await?;
        if liked {
            self.counters.set_user_flag(user_id, &subject, true).await;
        }
        Ok(liked)
    }

    pub async fn stats(&self, id: Uuid) -> Result<PostStats, EngagementError> {
        self.require_post(id).await?;
        self.stats_for(id).await
    }

    async fn stats_for(&self, id: Uuid) -> Result<PostStats, EngagementError> {
        Ok(PostStats {
            likes: self.counter(id, CounterField::Likes).await?,
            views: self.counter(id, CounterField::Views).await?,
        })
    }

    async fn counter(&self, id: Uuid, field: CounterField) -> Result<i64, EngagementError> {
        let subject = id.to_string();
        if let Some(value) = self.counters.get_counter(&subject, field.as_str()).await {
            return Ok(value);
        }

        let value = self.reader.count(id, field).await?;
        debug!(post_id = %id, field = field.as_str(), value, "counter re-derived from repository");
        self.counters
            .seed_counter(&subject, field.as_str(), value)
            .await;
        Ok(value)
    }

    /// Apply a committed write to the mirror.
    ///
    /// An increment that creates the key holds only `delta`, not the durable
    /// total, so such a key is dropped and re-derived on the next read.
    async fn mirror_delta(&self, id: Uuid, field: CounterField, delta: i64) {
        let subject = id.to_string();
        if self
            .counters
            .increment_counter(&subject, field.as_str(), delta)
            .await
            == Some(delta)
        {
            self.counters.clear_counter(&subject, field.as_str()).await;
        }
    }

    async fn require_post(&self, id: Uuid) -> Result<PostRecord, EngagementError> {
        self.reader
            .find_post(id)
            .await?
            .ok_or(EngagementError::PostNotFound(id))
    }
}
