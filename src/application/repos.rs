//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{CounterField, PostRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, RepoError>;

    async fn find_post(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError>;

    /// Authoritative aggregate for one engagement field.
    async fn count(&self, post_id: Uuid, field: CounterField) -> Result<i64, RepoError>;

    async fn has_liked(&self, user_id: &str, post_id: Uuid) -> Result<bool, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;

    /// Returns the new view total.
    async fn record_view(&self, post_id: Uuid) -> Result<i64, RepoError>;

    /// Returns `true` when the like did not exist before.
    async fn add_like(&self, user_id: &str, post_id: Uuid) -> Result<bool, RepoError>;

    /// Returns `true` when a like was removed.
    async fn remove_like(&self, user_id: &str, post_id: Uuid) -> Result<bool, RepoError>;
}
