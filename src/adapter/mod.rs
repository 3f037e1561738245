pub mod elasticsearch;
pub mod postgres;

use crate::{errors, model::Post};

/// Write side of the search index. Every write is keyed by document id and
/// idempotent, so replaying a change is harmless.
#[async_trait::async_trait]
pub trait ISearchIndex: Send + Sync {
    async fn upsert(&self, index: &str, id: &str, document: &serde_json::Value)
    -> errors::Result<()>;

    /// Deleting a document that does not exist succeeds.
    async fn delete(&self, index: &str, id: &str) -> errors::Result<()>;
}

/// Read access to the authoritative `post` rows.
#[async_trait::async_trait]
pub trait IPostRepository: Send + Sync {
    async fn list_active_posts(&self) -> errors::Result<Vec<Post>>;
    async fn find_post_by_id(&self, id: i64) -> errors::Result<Option<Post>>;
}
