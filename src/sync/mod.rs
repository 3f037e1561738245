pub mod connector;
pub mod decoder;
pub mod dispatcher;
pub mod handler;
pub mod manager;
pub mod service;
pub mod supervisor;

use crate::errors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    TxBegin,
    TxEnd,
    RowChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub schema_name: String,
    pub table_name: String,
    pub entry_type: EntryType,
}

/// One unit delivered by a connector. `store_value` holds the undecoded
/// row-change payload; transaction markers carry an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub header: EntryHeader,
    pub store_value: String,
}

impl ChangeEntry {
    pub fn transaction_marker(entry_type: EntryType) -> Self {
        ChangeEntry {
            header: EntryHeader {
                schema_name: String::new(),
                table_name: String::new(),
                entry_type,
            },
            store_value: String::new(),
        }
    }

    pub fn row_change(schema_name: &str, table_name: &str, store_value: &str) -> Self {
        ChangeEntry {
            header: EntryHeader {
                schema_name: schema_name.to_string(),
                table_name: table_name.to_string(),
                entry_type: EntryType::RowChange,
            },
            store_value: store_value.to_string(),
        }
    }

    pub fn is_transaction_marker(&self) -> bool {
        matches!(
            self.header.entry_type,
            EntryType::TxBegin | EntryType::TxEnd
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub value: Option<String>,
}

impl Column {
    pub fn new(name: &str, value: Option<&str>) -> Self {
        Column {
            name: name.to_string(),
            value: value.map(ToOwned::to_owned),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowData {
    pub before_columns: Vec<Column>,
    pub after_columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub event_type: EventType,
    pub rows: Vec<RowData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: i64,
    pub entries: Vec<ChangeEntry>,
}

impl Batch {
    pub const EMPTY_ID: i64 = -1;

    pub fn empty() -> Self {
        Batch {
            id: Self::EMPTY_ID,
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id == Self::EMPTY_ID || self.entries.is_empty()
    }
}

/// Produces a fresh connection for every connection attempt.
#[async_trait::async_trait]
pub trait IConnector: Send + Sync {
    async fn connect(&self) -> errors::Result<Box<dyn IConnection>>;
}

/// A live connection to the change stream.
///
/// `fetch_without_ack` never advances the committed offset; only `ack` does.
/// `rollback` rewinds delivery to the last acknowledged batch.
#[async_trait::async_trait]
pub trait IConnection: Send {
    async fn subscribe(&mut self, table_filter: &str) -> errors::Result<()>;
    async fn rollback(&mut self) -> errors::Result<()>;
    async fn fetch_without_ack(&mut self, batch_size: usize) -> errors::Result<Batch>;
    async fn ack(&mut self, batch_id: i64) -> errors::Result<()>;
    async fn disconnect(&mut self) -> errors::Result<()>;
}
