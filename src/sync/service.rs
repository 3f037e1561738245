use std::sync::Arc;

use crate::{
    adapter::{IPostRepository, ISearchIndex},
    errors,
    lock::KeyedLocks,
    sync::handler::post::{delete_post, upsert_post},
};

/// Out-of-band maintenance of the post index: full resync and single
/// record sync/delete, independent of the live change stream.
pub struct IndexSyncService {
    repository: Arc<dyn IPostRepository>,
    index: Arc<dyn ISearchIndex>,
    index_name: String,
    locks: KeyedLocks<i64>,
}

impl IndexSyncService {
    pub fn new(
        repository: Arc<dyn IPostRepository>,
        index: Arc<dyn ISearchIndex>,
        index_name: &str,
    ) -> Self {
        IndexSyncService {
            repository,
            index,
            index_name: index_name.to_string(),
            locks: KeyedLocks::new(),
        }
    }

    /// Re-indexes every live post. Returns how many were written.
    pub async fn sync_all(&self) -> usize {
        log::info!("Starting full resync of index [{}]...", self.index_name);

        let posts = match self.repository.list_active_posts().await {
            Ok(posts) => posts,
            Err(error) => {
                log::error!("Failed to load posts for full resync: {error}");
                return 0;
            }
        };

        let total = posts.len();
        let mut synced = 0;

        for post in posts.iter().filter(|post| !post.is_deleted()) {
            match upsert_post(self.index.as_ref(), &self.index_name, post).await {
                Ok(()) => synced += 1,
                Err(error) => log::error!("Failed to index post {}: {error}", post.id),
            }
        }

        log::info!("Full resync finished: {synced}/{total} posts indexed");

        synced
    }

    pub async fn sync_one(&self, id: i64) -> errors::Result<bool> {
        let _guard = self.locks.lock(id).await;

        let Some(post) = self.repository.find_post_by_id(id).await? else {
            log::warn!("Post {id} not found, nothing to sync");
            return Ok(false);
        };

        if post.is_deleted() {
            log::warn!("Post {id} is deleted, nothing to sync");
            return Ok(false);
        }

        match upsert_post(self.index.as_ref(), &self.index_name, &post).await {
            Ok(()) => {
                log::info!("Post {id} synced");
                Ok(true)
            }
            Err(error) => {
                log::error!("Failed to index post {id}: {error}");
                Ok(false)
            }
        }
    }

    pub async fn delete_one(&self, id: i64) -> errors::Result<()> {
        let _guard = self.locks.lock(id).await;

        delete_post(self.index.as_ref(), &self.index_name, id).await?;
        log::info!("Post {id} removed from index [{}]", self.index_name);

        Ok(())
    }

    pub async fn delete_many(&self, ids: &[i64]) -> usize {
        let mut deleted = 0;

        for id in ids {
            match self.delete_one(*id).await {
                Ok(()) => deleted += 1,
                Err(error) => log::error!("Failed to delete post {id}: {error}"),
            }
        }

        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::Errors,
        model::Post,
        testing::{MemoryIndex, MemoryRepository},
    };

    fn post(id: i64, is_delete: i32) -> Post {
        Post {
            id,
            title: Some(format!("post {id}")),
            is_delete: Some(is_delete),
            ..Default::default()
        }
    }

    fn service(
        repository: &Arc<MemoryRepository>,
        index: &Arc<MemoryIndex>,
    ) -> IndexSyncService {
        IndexSyncService::new(repository.clone(), index.clone(), "post")
    }

    #[tokio::test]
    async fn sync_all_counts_only_successful_writes() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        for id in 1..=10 {
            repository.insert(post(id, 0));
        }
        index.fail_on("7");

        let synced = service(&repository, &index).sync_all().await;

        assert_eq!(synced, 9);
        assert_eq!(index.len("post"), 9);
        assert!(index.document("post", "7").is_none());
    }

    #[tokio::test]
    async fn sync_all_skips_soft_deleted_posts() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        repository.insert(post(1, 0));
        repository.insert(post(2, 1));

        let synced = service(&repository, &index).sync_all().await;

        assert_eq!(synced, 1);
        assert!(index.document("post", "2").is_none());
    }

    #[tokio::test]
    async fn sync_all_returns_zero_when_the_repository_fails() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        repository.insert(post(1, 0));
        repository.set_unavailable(true);

        assert_eq!(service(&repository, &index).sync_all().await, 0);
        assert!(index.writes().is_empty());
    }

    #[tokio::test]
    async fn sync_one_leaves_the_index_alone_for_missing_or_deleted_posts() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        repository.insert(post(5, 1));
        let service = service(&repository, &index);

        assert!(!service.sync_one(4).await.unwrap());
        assert!(!service.sync_one(5).await.unwrap());
        assert!(index.writes().is_empty());
    }

    #[tokio::test]
    async fn sync_one_indexes_a_live_post() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        repository.insert(post(3, 0));

        assert!(service(&repository, &index).sync_one(3).await.unwrap());
        assert_eq!(index.document("post", "3").unwrap()["title"], "post 3");
    }

    #[tokio::test]
    async fn sync_one_reports_index_failures_as_false() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        repository.insert(post(3, 0));
        index.fail_on("3");

        assert!(!service(&repository, &index).sync_one(3).await.unwrap());
    }

    #[tokio::test]
    async fn sync_one_propagates_repository_failures() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        repository.set_unavailable(true);

        let result = service(&repository, &index).sync_one(3).await;

        assert!(matches!(result, Err(Errors::DatabaseQueryError(_))));
    }

    #[tokio::test]
    async fn delete_one_propagates_index_failures() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        index.fail_on("8");
        let service = service(&repository, &index);

        assert!(service.delete_one(9).await.is_ok());
        assert!(matches!(
            service.delete_one(8).await,
            Err(Errors::IndexDeleteFailed(_))
        ));
    }

    #[tokio::test]
    async fn delete_many_continues_past_failures() {
        let repository = Arc::new(MemoryRepository::default());
        let index = Arc::new(MemoryIndex::default());
        index.fail_on("2");

        let deleted = service(&repository, &index).delete_many(&[1, 2, 3]).await;

        assert_eq!(deleted, 2);
        assert_eq!(
            index.deletes(),
            vec!["post/1".to_string(), "post/3".to_string()]
        );
    }
}
