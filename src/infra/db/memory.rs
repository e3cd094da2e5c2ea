use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{CreatePostParams, PostsRepo, PostsWriteRepo, RepoError};
use crate::domain::entities::{CounterField, PostRecord};

/// Repository holding posts, views and likes in process memory.
///
/// Stands in for the durable store; aggregate queries are counted so callers
/// can observe when the cache mirror spared a round trip.
#[derive(Default)]
pub struct InMemoryPostsRepo {
    state: RwLock<State>,
    count_queries: AtomicUsize,
    like_lookups: AtomicUsize,
}

#[derive(Default)]
struct State {
    posts: Vec<PostRecord>,
    views: HashMap<Uuid, i64>,
    likes: HashSet<(String, Uuid)>,
}

impl State {
    fn contains(&self, post_id: Uuid) -> bool {
        self.posts.iter().any(|post| post.id == post_id)
    }
}

impl InMemoryPostsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of aggregate `count` queries served so far.
    pub fn count_queries(&self) -> usize {
        self.count_queries.load(Ordering::Relaxed)
    }

    /// Number of `has_liked` lookups served so far.
    pub fn like_lookups(&self) -> usize {
        self.like_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PostsRepo for InMemoryPostsRepo {
    async fn list_posts(&self) -> Result<Vec<PostRecord>, RepoError> {
        Ok(self.state.read().await.posts.clone())
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        let state = self.state.read().await;
        Ok(state.posts.iter().find(|post| post.id == id).cloned())
    }

    async fn count(&self, post_id: Uuid, field: CounterField) -> Result<i64, RepoError> {
        self.count_queries.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        if !state.contains(post_id) {
            return Err(RepoError::NotFound);
        }

        let value = match field {
            CounterField::Views => state.views.get(&post_id).copied().unwrap_or(0),
            CounterField::Likes => {
                let likes = state.likes.iter().filter(|(_, id)| *id == post_id).count();
                i64::try_from(likes).map_err(RepoError::from_persistence)?
            }
        };
        Ok(value)
    }

    async fn has_liked(&self, user_id: &str, post_id: Uuid) -> Result<bool, RepoError> {
        self.like_lookups.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        Ok(state.likes.contains(&(user_id.to_string(), post_id)))
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[async_trait]
impl PostsWriteRepo for InMemoryPostsRepo {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let post = PostRecord {
            id: Uuid::new_v4(),
            title: params.title,
            body: params.body,
        };
        self.state.write().await.posts.push(post.clone());
        Ok(post)
    }

    async fn record_view(&self, post_id: Uuid) -> Result<i64, RepoError> {
        let mut state = self.state.write().await;
        if !state.contains(post_id) {
            return Err(RepoError::NotFound);
        }
        let views = state.views.entry(post_id).or_insert(0);
        *views += 1;
        Ok(*views)
    }

    async fn add_like(&self, user_id: &str, post_id: Uuid) -> Result<bool, RepoError> {
        let mut state = self.state.write().await;
        if !state.contains(post_id) {
            return Err(RepoError::NotFound);
        }
        Ok(state.likes.insert((user_id.to_string(), post_id)))
    }

    async fn remove_like(&self, user_id: &str, post_id: Uuid) -> Result<bool, RepoError> {
        let mut state = self.state.write().await;
        Ok(state.likes.remove(&(user_id.to_string(), post_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo_with_post() -> (InMemoryPostsRepo, Uuid) {
        let repo = InMemoryPostsRepo::new();
        let post = repo
            .create_post(CreatePostParams {
                title: "t".into(),
                body: "b".into(),
            })
            .await
            .expect("create");
        (repo, post.id)
    }

    #[tokio::test]
    async fn likes_are_idempotent_per_user() {
        let (repo, id) = repo_with_post().await;

        assert!(repo.add_like("u1", id).await.expect("like"));
        assert!(!repo.add_like("u1", id).await.expect("like"));
        assert!(repo.add_like("u2", id).await.expect("like"));
        assert_eq!(repo.count(id, CounterField::Likes).await.expect("count"), 2);

        assert!(repo.remove_like("u1", id).await.expect("unlike"));
        assert!(!repo.remove_like("u1", id).await.expect("unlike"));
        assert_eq!(repo.count(id, CounterField::Likes).await.expect("count"), 1);
        assert_eq!(repo.count_queries(), 2);
    }

    #[tokio::test]
    async fn views_accumulate() {
        let (repo, id) = repo_with_post().await;
        assert_eq!(repo.record_view(id).await.expect("view"), 1);
        assert_eq!(repo.record_view(id).await.expect("view"), 2);
        assert_eq!(repo.count(id, CounterField::Views).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn unknown_post_is_not_found() {
        let repo = InMemoryPostsRepo::new();
        assert!(matches!(
            repo.record_view(Uuid::new_v4()).await,
            Err(RepoError::NotFound)
        ));
        assert!(matches!(
            repo.count(Uuid::new_v4(), CounterField::Likes).await,
            Err(RepoError::NotFound)
        ));
    }
}
