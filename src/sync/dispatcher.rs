use std::{collections::BTreeMap, sync::Arc};

use crate::sync::{
    ChangeEntry, EventType,
    decoder::decode_row_change,
    handler::{HandlerRegistry, WriteCounter},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSummary {
    pub insert_count: usize,
    pub update_count: usize,
    pub delete_count: usize,
    pub writes: WriteCounter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub tables: BTreeMap<String, TableSummary>,
    pub decode_failures: usize,
    pub unhandled_entries: usize,
}

impl DispatchSummary {
    pub fn log(&self) {
        for (table_name, summary) in self.tables.iter() {
            log::info!(
                "Table [{}]: Inserted: {}, Updated: {}, Deleted: {}, Failed: {}",
                table_name,
                summary.insert_count,
                summary.update_count,
                summary.delete_count,
                summary.writes.failed + summary.writes.skipped,
            );
        }

        if self.decode_failures > 0 {
            log::warn!("{} entries could not be decoded", self.decode_failures);
        }
    }
}

/// Routes decoded row changes to their table handlers, strictly in batch
/// order, so a later change to a key always lands after an earlier one.
#[derive(Clone)]
pub struct BatchDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl BatchDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        BatchDispatcher { registry }
    }

    pub async fn dispatch(&self, entries: &[ChangeEntry]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for entry in entries {
            if entry.is_transaction_marker() {
                continue;
            }

            let schema_name = entry.header.schema_name.as_str();
            let table_name = entry.header.table_name.as_str();

            let row_change = match decode_row_change(&entry.store_value) {
                Ok(row_change) => row_change,
                Err(error) => {
                    log::error!("Skipping change on {schema_name}.{table_name}: {error}");
                    summary.decode_failures += 1;
                    continue;
                }
            };

            let Some(handler) = self.registry.get(table_name) else {
                log::debug!("No handler for table {schema_name}.{table_name}, skipping");
                summary.unhandled_entries += 1;
                continue;
            };

            log::debug!(
                "Dispatching {:?} on {schema_name}.{table_name}",
                row_change.event_type
            );

            let writes = handler
                .handle_data_change(
                    schema_name,
                    table_name,
                    row_change.event_type,
                    &row_change.rows,
                )
                .await;

            let table_summary = summary
                .tables
                .entry(format!("{schema_name}.{table_name}"))
                .or_default();

            let row_count = row_change.rows.len();
            match row_change.event_type {
                EventType::Insert => table_summary.insert_count += row_count,
                EventType::Update => table_summary.update_count += row_count,
                EventType::Delete => table_summary.delete_count += row_count,
            }
            table_summary.writes.merge(writes);
        }

        summary
    }
}
