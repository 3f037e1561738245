use regex::Regex;

use crate::{
    adapter::postgres::{OUTPUT_PLUGIN, PostgresConnection},
    config::PostgresConnectionConfig,
    errors::{self, Errors},
    sync::{Batch, ChangeEntry, IConnection, IConnector, decoder},
};

/// Change stream backed by a PostgreSQL logical replication slot.
pub struct PostgresConnector {
    connection_config: PostgresConnectionConfig,
    slot_name: String,
}

impl PostgresConnector {
    pub fn new(connection_config: PostgresConnectionConfig, slot_name: &str) -> Self {
        PostgresConnector {
            connection_config,
            slot_name: slot_name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl IConnector for PostgresConnector {
    async fn connect(&self) -> errors::Result<Box<dyn IConnection>> {
        let connection = PostgresConnection::new(&self.connection_config);
        if let Err(error) = connection.ping().await {
            connection.close().await;
            return Err(error);
        }

        match connection
            .find_replication_slot_by_name(&self.slot_name)
            .await?
        {
            None => {
                log::info!(
                    "Replication slot {} does not exist, creating a new one",
                    self.slot_name
                );
                connection.create_replication_slot(&self.slot_name).await?;
            }
            Some(slot) if slot.plugin.as_deref() != Some(OUTPUT_PLUGIN) => {
                connection.close().await;
                return Err(Errors::ReplicationSlotCreateFailed(format!(
                    "Replication slot {} uses plugin {:?}, expected {OUTPUT_PLUGIN}",
                    slot.slot_name, slot.plugin
                )));
            }
            Some(_) => {}
        }

        Ok(Box::new(PostgresStreamConnection {
            connection,
            slot_name: self.slot_name.clone(),
            table_filter: None,
        }))
    }
}

pub struct PostgresStreamConnection {
    connection: PostgresConnection,
    slot_name: String,
    table_filter: Option<Regex>,
}

impl PostgresStreamConnection {
    fn accepts(&self, entry: &ChangeEntry) -> bool {
        if entry.is_transaction_marker() {
            return true;
        }

        match &self.table_filter {
            Some(filter) => filter.is_match(&format!(
                "{}.{}",
                entry.header.schema_name, entry.header.table_name
            )),
            None => true,
        }
    }
}

#[async_trait::async_trait]
impl IConnection for PostgresStreamConnection {
    async fn subscribe(&mut self, table_filter: &str) -> errors::Result<()> {
        self.table_filter = Some(compile_table_filter(table_filter)?);
        log::info!("Subscribed to slot {} with filter {table_filter}", self.slot_name);

        Ok(())
    }

    async fn rollback(&mut self) -> errors::Result<()> {
        // peeking never consumes, so the next fetch already starts at the
        // slot's confirmed position
        log::debug!("Rolled back slot {} to its confirmed position", self.slot_name);
        Ok(())
    }

    async fn fetch_without_ack(&mut self, batch_size: usize) -> errors::Result<Batch> {
        let limit = i32::try_from(batch_size).unwrap_or(i32::MAX);
        let rows = self.connection.peek_changes(&self.slot_name, limit).await?;

        let Some(last) = rows.last() else {
            return Ok(Batch::empty());
        };
        let id = parse_lsn(&last.lsn)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            match decoder::decode_line(&row.data) {
                Ok(Some(entry)) if self.accepts(&entry) => entries.push(entry),
                Ok(_) => {}
                Err(error) => {
                    log::error!("Skipping undecodable change at {}: {error}", row.lsn);
                }
            }
        }

        Ok(Batch { id, entries })
    }

    async fn ack(&mut self, batch_id: i64) -> errors::Result<()> {
        self.connection
            .advance_replication_slot(&self.slot_name, &format_lsn(batch_id))
            .await
    }

    async fn disconnect(&mut self) -> errors::Result<()> {
        self.connection.close().await;
        log::info!("Disconnected from slot {}", self.slot_name);
        Ok(())
    }
}

/// The filter must match the whole `schema.table` name.
pub fn compile_table_filter(table_filter: &str) -> errors::Result<Regex> {
    Regex::new(&format!("^(?:{table_filter})$"))
        .map_err(|e| Errors::InvalidTableFilter(format!("{table_filter}: {e}")))
}

/// Parses a textual LSN (`16/B374D848`) into its 64-bit position.
pub fn parse_lsn(lsn: &str) -> errors::Result<i64> {
    let invalid = || Errors::ChangeDecodeError(format!("Invalid LSN: {lsn}"));

    let (high, low) = lsn.split_once('/').ok_or_else(invalid)?;
    let high = u32::from_str_radix(high, 16).map_err(|_| invalid())?;
    let low = u32::from_str_radix(low, 16).map_err(|_| invalid())?;

    i64::try_from((u64::from(high) << 32) | u64::from(low)).map_err(|_| invalid())
}

pub fn format_lsn(position: i64) -> String {
    let position = position as u64;
    format!("{:X}/{:X}", position >> 32, position & 0xFFFF_FFFF)
}
