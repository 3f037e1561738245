use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Configuration {
    pub source: SourceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub target: Target,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub connection: PostgresConnectionConfig,
    pub stream_id: Option<String>,
    pub table_filter: Option<String>,
}

pub mod default {
    pub mod source {
        pub const STREAM_ID: &str = "indexpipe_slot";
        pub const TABLE_FILTER: &str = r".*\..*";
    }

    pub mod sync {
        pub const ENABLED: bool = true;
        pub const BATCH_SIZE: usize = 1000;
        pub const IDLE_SLEEP_MILLIS: u64 = 1000;
        pub const BASE_BACKOFF_MILLIS: u64 = 1000;
        pub const MAX_BACKOFF_MILLIS: u64 = 30000;
        pub const MAX_ATTEMPTS_BEFORE_RESET: u32 = 10;
    }

    pub mod elasticsearch {
        pub const INDEX: &str = "post";
        pub const TIMEOUT_MILLIS: u64 = 10000;
    }
}

impl SourceConfig {
    pub fn get_stream_id(&self) -> &str {
        self.stream_id
            .as_deref()
            .unwrap_or(default::source::STREAM_ID)
    }

    pub fn get_table_filter(&self) -> &str {
        self.table_filter
            .as_deref()
            .unwrap_or(default::source::TABLE_FILTER)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncConfig {
    pub enabled: Option<bool>,
    pub batch_size: Option<usize>,
    pub idle_sleep_millis: Option<u64>,
    pub base_backoff_millis: Option<u64>,
    pub max_backoff_millis: Option<u64>,
    pub max_attempts_before_reset: Option<u32>,
    #[serde(default)]
    pub resync_on_startup: bool,
}

impl SyncConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(default::sync::ENABLED)
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(default::sync::BATCH_SIZE).max(1)
    }

    pub fn get_idle_sleep(&self) -> Duration {
        Duration::from_millis(
            self.idle_sleep_millis
                .unwrap_or(default::sync::IDLE_SLEEP_MILLIS),
        )
    }

    pub fn get_base_backoff(&self) -> Duration {
        Duration::from_millis(
            self.base_backoff_millis
                .unwrap_or(default::sync::BASE_BACKOFF_MILLIS),
        )
    }

    pub fn get_max_backoff(&self) -> Duration {
        Duration::from_millis(
            self.max_backoff_millis
                .unwrap_or(default::sync::MAX_BACKOFF_MILLIS),
        )
    }

    pub fn get_max_attempts_before_reset(&self) -> u32 {
        self.max_attempts_before_reset
            .unwrap_or(default::sync::MAX_ATTEMPTS_BEFORE_RESET)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    pub elasticsearch: ElasticsearchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub index: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_millis: Option<u64>,
}

impl ElasticsearchConfig {
    pub fn get_index(&self) -> &str {
        self.index
            .as_deref()
            .unwrap_or(default::elasticsearch::INDEX)
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(
            self.timeout_millis
                .unwrap_or(default::elasticsearch::TIMEOUT_MILLIS),
        )
    }
}
