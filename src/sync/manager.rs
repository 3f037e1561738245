use std::{
    fmt,
    sync::{Arc, Mutex as StdMutex},
};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    config::Configuration,
    errors::{self, Errors},
    sync::{
        IConnector,
        dispatcher::BatchDispatcher,
        handler::HandlerRegistry,
        service::IndexSyncService,
        supervisor::{
            ConnectionSupervisor, SupervisorHandle, SupervisorSettings, SupervisorStatus,
        },
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub running: bool,
    pub connected: bool,
    pub host: String,
    pub port: u16,
    pub stream_id: String,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enabled: {}, running: {}, connected: {}, source: {}:{}, stream: {}",
            self.enabled, self.running, self.connected, self.host, self.port, self.stream_id
        )
    }
}

/// Owns the lifecycle of the live sync loop and exposes the administrative
/// operations.
pub struct DataSyncManager {
    config: Configuration,
    connector: Arc<dyn IConnector>,
    registry: Arc<HandlerRegistry>,
    service: Arc<IndexSyncService>,
    supervisor: Mutex<Option<SupervisorHandle>>,
    /// Readable without waiting on lifecycle operations.
    current_status: StdMutex<Option<Arc<SupervisorStatus>>>,
}

impl DataSyncManager {
    pub fn new(
        config: Configuration,
        connector: Arc<dyn IConnector>,
        registry: Arc<HandlerRegistry>,
        service: Arc<IndexSyncService>,
    ) -> Self {
        DataSyncManager {
            config,
            connector,
            registry,
            service,
            supervisor: Mutex::new(None),
            current_status: StdMutex::new(None),
        }
    }

    pub async fn start(&self) {
        if !self.config.sync.is_enabled() {
            log::info!("Sync is disabled, the sync loop will not be started");
            return;
        }

        if self.supervisor.lock().await.is_some() {
            log::warn!("Sync loop is already running");
            return;
        }

        if self.config.sync.resync_on_startup {
            self.service.sync_all().await;
        }

        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            log::warn!("Sync loop is already running");
            return;
        }

        *supervisor = Some(self.spawn_supervisor());
    }

    pub async fn shutdown(&self) {
        let mut supervisor = self.supervisor.lock().await;

        if let Some(handle) = supervisor.take() {
            log::info!("Stopping sync loop...");
            handle.shutdown().await;
        }
    }

    /// Stops the loop and starts a fresh one from the configuration this
    /// manager was built with. The configuration file is not read again.
    pub async fn restart(&self) {
        let mut supervisor = self.supervisor.lock().await;

        if let Some(handle) = supervisor.take() {
            handle.shutdown().await;
        }

        if self.config.sync.is_enabled() {
            log::info!("Restarting sync loop");
            *supervisor = Some(self.spawn_supervisor());
        }
    }

    pub async fn reconnect(&self) {
        match self.supervisor.lock().await.as_ref() {
            Some(handle) => handle.request_reconnect(),
            None => log::warn!("Sync loop is not running, nothing to reconnect"),
        }
    }

    pub async fn trigger_full_resync(&self) -> usize {
        self.service.sync_all().await
    }

    pub async fn sync_one(&self, id: i64) -> errors::Result<bool> {
        self.service.sync_one(id).await
    }

    pub async fn delete_one(&self, id: i64) -> errors::Result<()> {
        self.service.delete_one(id).await
    }

    pub async fn delete_many(&self, ids: &[i64]) -> usize {
        self.service.delete_many(ids).await
    }

    /// Brings one document in line with its source row. Returns whether the
    /// document is indexed afterwards.
    pub async fn reconcile(&self, table_name: &str, id: i64) -> errors::Result<bool> {
        let Some(handler) = self.registry.get(table_name) else {
            return Err(Errors::HandlerNotFound(format!(
                "no handler registered for table {table_name}"
            )));
        };

        if handler.check_target_exists(id).await? {
            self.service.sync_one(id).await
        } else {
            self.service.delete_one(id).await?;
            Ok(false)
        }
    }

    pub fn status(&self) -> SyncStatus {
        let current = self
            .current_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let (running, connected) = match current {
            Some(status) => (status.is_running(), status.is_connected()),
            None => (false, false),
        };

        SyncStatus {
            enabled: self.config.sync.is_enabled(),
            running,
            connected,
            host: self.config.source.connection.host.clone(),
            port: self.config.source.connection.port,
            stream_id: self.config.source.get_stream_id().to_string(),
        }
    }

    fn spawn_supervisor(&self) -> SupervisorHandle {
        let handle = ConnectionSupervisor::spawn(
            self.connector.clone(),
            BatchDispatcher::new(self.registry.clone()),
            SupervisorSettings::from_config(&self.config),
        );

        *self
            .current_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle.status());

        handle
    }
}
