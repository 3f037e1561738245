pub mod post;

use std::{collections::HashMap, sync::Arc};

pub use post::PostTableHandler;

use crate::{
    errors,
    sync::{EventType, RowData},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounter {
    pub upserted: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WriteCounter {
    pub fn merge(&mut self, other: WriteCounter) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Applies decoded row changes of one table to the search index.
///
/// Implementations must contain their own failures: a row that cannot be
/// parsed or written is logged and counted, never propagated.
#[async_trait::async_trait]
pub trait ITableHandler: Send + Sync {
    fn table_name(&self) -> &str;

    /// Whether the source row behind `id` exists and is live.
    async fn check_target_exists(&self, id: i64) -> errors::Result<bool>;

    async fn handle_data_change(
        &self,
        schema_name: &str,
        table_name: &str,
        event_type: EventType,
        rows: &[RowData],
    ) -> WriteCounter;
}

/// Table name to handler. Filled once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ITableHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn ITableHandler>>) -> Self {
        let handlers: HashMap<_, _> = handlers
            .into_iter()
            .map(|handler| (handler.table_name().to_string(), handler))
            .collect();

        log::info!("Registered {} table handler(s)", handlers.len());

        HandlerRegistry { handlers }
    }

    pub fn get(&self, table_name: &str) -> Option<&Arc<dyn ITableHandler>> {
        self.handlers.get(table_name)
    }
}
