//! In-memory collaborators for unit tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    adapter::{IPostRepository, ISearchIndex},
    errors::{self, Errors},
    model::Post,
    sync::{Batch, ChangeEntry, Column, IConnection, IConnector},
};

pub fn post_columns(id: i64, title: &str, extra: &[(&str, Option<&str>)]) -> Vec<Column> {
    let id = id.to_string();
    let mut columns = vec![
        Column::new("id", Some(&id)),
        Column::new("title", Some(title)),
    ];
    columns.extend(extra.iter().map(|(name, value)| Column::new(name, *value)));
    columns
}

/// `table public.post: INSERT: ...` payload for a post row.
pub fn post_entry(action: &str, id: i64, title: &str, is_delete: i32) -> ChangeEntry {
    ChangeEntry::row_change(
        "public",
        "post",
        &format!(
            "{action}: id[bigint]:{id} title[text]:'{title}' \"isDelete\"[smallint]:{is_delete}"
        ),
    )
}

#[derive(Default)]
pub struct MemoryIndex {
    documents: Mutex<HashMap<(String, String), serde_json::Value>>,
    failing_ids: Mutex<HashSet<String>>,
    deletes: Mutex<Vec<String>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryIndex {
    pub fn fail_on(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn document(&self, index: &str, id: &str) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .unwrap()
            .get(&(index.to_string(), id.to_string()))
            .cloned()
    }

    pub fn len(&self, index: &str) -> usize {
        self.documents
            .lock()
            .unwrap()
            .keys()
            .filter(|(name, _)| name == index)
            .count()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    /// Every upsert and delete, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn check_failure(&self, id: &str) -> bool {
        self.failing_ids.lock().unwrap().contains(id)
    }
}

#[async_trait::async_trait]
impl ISearchIndex for MemoryIndex {
    async fn upsert(
        &self,
        index: &str,
        id: &str,
        document: &serde_json::Value,
    ) -> errors::Result<()> {
        if self.check_failure(id) {
            return Err(Errors::IndexWriteFailed(format!("{index}/{id} rejected")));
        }

        self.writes.lock().unwrap().push(format!("upsert {index}/{id}"));
        self.documents
            .lock()
            .unwrap()
            .insert((index.to_string(), id.to_string()), document.clone());
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> errors::Result<()> {
        if self.check_failure(id) {
            return Err(Errors::IndexDeleteFailed(format!("{index}/{id} rejected")));
        }

        self.writes.lock().unwrap().push(format!("delete {index}/{id}"));
        self.deletes.lock().unwrap().push(format!("{index}/{id}"));
        self.documents
            .lock()
            .unwrap()
            .remove(&(index.to_string(), id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    posts: Mutex<BTreeMap<i64, Post>>,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRepository {
    pub fn insert(&self, post: Post) {
        self.posts.lock().unwrap().insert(post.id, post);
    }

    /// Makes every read wait this long first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn wait(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> errors::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Errors::DatabaseQueryError("repository unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IPostRepository for MemoryRepository {
    async fn list_active_posts(&self) -> errors::Result<Vec<Post>> {
        self.wait().await;
        self.check_available()?;
        Ok(self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|post| !post.is_deleted())
            .cloned()
            .collect())
    }

    async fn find_post_by_id(&self, id: i64) -> errors::Result<Option<Post>> {
        self.wait().await;
        self.check_available()?;
        Ok(self.posts.lock().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct StreamState {
    /// Every batch ever published, in offset order.
    pub log: Vec<Batch>,
    pub cursor: usize,
    pub acked: Vec<i64>,
    pub connect_failures: usize,
    pub fetch_errors: VecDeque<Errors>,
    pub ack_errors: VecDeque<Errors>,
    pub block_fetch: bool,
    pub connects: usize,
    pub disconnects: usize,
    pub subscriptions: Vec<String>,
}

impl StreamState {
    fn position_after_last_ack(&self) -> usize {
        match self.acked.last() {
            Some(acked) => self
                .log
                .iter()
                .position(|batch| batch.id == *acked)
                .map_or(0, |index| index + 1),
            None => 0,
        }
    }
}

/// Connector stub whose `rollback` rewinds to the last acknowledged batch.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub state: Arc<Mutex<StreamState>>,
}

impl ScriptedConnector {
    pub fn publish(&self, entries: Vec<ChangeEntry>) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.log.len() as i64 + 1;
        state.log.push(Batch { id, entries });
        id
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut StreamState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl IConnector for ScriptedConnector {
    async fn connect(&self) -> errors::Result<Box<dyn IConnection>> {
        let mut state = self.state.lock().unwrap();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Errors::ConnectorConnectionError("connection refused".into()));
        }
        state.connects += 1;

        Ok(Box::new(ScriptedConnection {
            state: self.state.clone(),
        }))
    }
}

pub struct ScriptedConnection {
    state: Arc<Mutex<StreamState>>,
}

#[async_trait::async_trait]
impl IConnection for ScriptedConnection {
    async fn subscribe(&mut self, table_filter: &str) -> errors::Result<()> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push(table_filter.to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> errors::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.cursor = state.position_after_last_ack();
        Ok(())
    }

    async fn fetch_without_ack(&mut self, _batch_size: usize) -> errors::Result<Batch> {
        let block = {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.fetch_errors.pop_front() {
                return Err(error);
            }
            state.block_fetch
        };

        if block {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let batch = state.log.get(state.cursor).cloned();
        match batch {
            Some(batch) => {
                state.cursor += 1;
                Ok(batch)
            }
            None => Ok(Batch::empty()),
        }
    }

    async fn ack(&mut self, batch_id: i64) -> errors::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.ack_errors.pop_front() {
            return Err(error);
        }
        state.acked.push(batch_id);
        Ok(())
    }

    async fn disconnect(&mut self) -> errors::Result<()> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }
}
