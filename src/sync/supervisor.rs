use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::{
    config::Configuration,
    errors,
    sync::{Batch, IConnection, IConnector, dispatcher::BatchDispatcher},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    BackingOff = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::BackingOff,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Written only by the supervisor task, readable from anywhere.
#[derive(Debug)]
pub struct SupervisorStatus {
    running: AtomicBool,
    state: AtomicU8,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        SupervisorStatus {
            running: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }
}

impl SupervisorStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            log::debug!("Connection state: {previous:?} -> {state:?}");
        }
    }
}

/// Linear backoff capped at `max`. After `max_attempts` consecutive failures
/// the counter starts over, so retrying never ends.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Backoff {
            base,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn next_wait(&mut self) -> Duration {
        self.attempts += 1;

        if self.attempts > self.max_attempts {
            self.attempts = 0;
            return self.max;
        }

        self.base.saturating_mul(self.attempts).min(self.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub table_filter: String,
    pub batch_size: usize,
    pub idle_sleep: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts_before_reset: u32,
}

impl SupervisorSettings {
    pub fn from_config(config: &Configuration) -> Self {
        SupervisorSettings {
            table_filter: config.source.get_table_filter().to_string(),
            batch_size: config.sync.get_batch_size(),
            idle_sleep: config.sync.get_idle_sleep(),
            base_backoff: config.sync.get_base_backoff(),
            max_backoff: config.sync.get_max_backoff(),
            max_attempts_before_reset: config.sync.get_max_attempts_before_reset(),
        }
    }
}

/// Control side of a running supervisor task.
pub struct SupervisorHandle {
    status: Arc<SupervisorStatus>,
    shutdown: watch::Sender<bool>,
    reconnect: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn status(&self) -> Arc<SupervisorStatus> {
        self.status.clone()
    }

    /// Drops the current connection and reconnects, without stopping the task.
    /// A request made while the loop is busy is kept until the loop next waits.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Stops the loop, interrupting any sleep or blocked fetch, and waits for
    /// the connection to be released.
    pub async fn shutdown(self) {
        self.status.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        if let Err(error) = self.task.await {
            log::error!("Sync supervisor task ended abnormally: {error}");
        }
    }
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn IConnector>,
    dispatcher: BatchDispatcher,
    settings: SupervisorSettings,
    status: Arc<SupervisorStatus>,
    shutdown: watch::Receiver<bool>,
    reconnect: Arc<Notify>,
    backoff: Backoff,
    connection: Option<Box<dyn IConnection>>,
}

enum PollOutcome {
    Polled(errors::Result<()>),
    Shutdown,
    Reconnect,
}

#[derive(Debug, PartialEq, Eq)]
enum Wake {
    Elapsed,
    Shutdown,
    Reconnect,
}

impl ConnectionSupervisor {
    pub fn spawn(
        connector: Arc<dyn IConnector>,
        dispatcher: BatchDispatcher,
        settings: SupervisorSettings,
    ) -> SupervisorHandle {
        let status = Arc::new(SupervisorStatus::default());
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let reconnect = Arc::new(Notify::new());

        let backoff = Backoff::new(
            settings.base_backoff,
            settings.max_backoff,
            settings.max_attempts_before_reset,
        );

        let supervisor = ConnectionSupervisor {
            connector,
            dispatcher,
            settings,
            status: status.clone(),
            shutdown: shutdown_receiver,
            reconnect: reconnect.clone(),
            backoff,
            connection: None,
        };

        status.running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(supervisor.run());

        SupervisorHandle {
            status,
            shutdown: shutdown_sender,
            reconnect,
            task,
        }
    }

    fn is_running(&self) -> bool {
        self.status.is_running() && !*self.shutdown.borrow()
    }

    async fn run(mut self) {
        log::info!("Starting sync loop...");

        while self.is_running() {
            if self.connection.is_none() {
                self.connect_or_back_off().await;
                continue;
            }

            self.poll_connected().await;
        }

        self.release_connection().await;
        self.status.set_state(ConnectionState::Disconnected);
        self.status.running.store(false, Ordering::SeqCst);

        log::info!("Sync loop stopped");
    }

    async fn connect_or_back_off(&mut self) {
        self.status.set_state(ConnectionState::Connecting);

        let attempt = interruptible(
            &mut self.shutdown,
            connect_to_connector(self.connector.as_ref(), &self.settings.table_filter),
        )
        .await;

        match attempt {
            None => {}
            Some(Ok(connection)) => {
                self.connection = Some(connection);
                self.backoff.reset();
                self.status.set_state(ConnectionState::Connected);
                log::info!("Connected to change stream, start syncing");
            }
            Some(Err(error)) => {
                self.status.set_state(ConnectionState::BackingOff);
                let wait = self.backoff.next_wait();
                log::warn!(
                    "Failed to connect to change stream: {error}. Retrying in {}ms (attempt {})",
                    wait.as_millis(),
                    self.backoff.attempts(),
                );
                self.sleep(wait).await;
            }
        }
    }

    async fn poll_connected(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        let outcome = tokio::select! {
            result = poll_once(
                &mut **connection,
                &self.dispatcher,
                self.settings.batch_size,
                self.settings.idle_sleep,
            ) => PollOutcome::Polled(result),
            _ = wait_for_shutdown(&mut self.shutdown) => PollOutcome::Shutdown,
            _ = self.reconnect.notified() => PollOutcome::Reconnect,
        };

        match outcome {
            PollOutcome::Polled(Ok(())) => {}
            PollOutcome::Polled(Err(error)) if error.is_connection_error() => {
                log::warn!("Lost connection to change stream: {error}");
                self.release_connection().await;
                self.status.set_state(ConnectionState::Disconnected);
            }
            PollOutcome::Polled(Err(error)) => {
                log::error!("Error while syncing changes: {error}");
                if self.sleep(self.settings.idle_sleep).await == Wake::Reconnect {
                    log::info!("Reconnect requested, dropping current connection");
                    self.release_connection().await;
                    self.status.set_state(ConnectionState::Disconnected);
                }
            }
            PollOutcome::Shutdown => {}
            PollOutcome::Reconnect => {
                log::info!("Reconnect requested, dropping current connection");
                self.release_connection().await;
                self.status.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn release_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(error) = connection.disconnect().await {
                log::warn!("Failed to disconnect cleanly: {error}");
            }
        }
    }

    /// Ends early on shutdown or on a reconnect request.
    async fn sleep(&mut self, duration: Duration) -> Wake {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Wake::Elapsed,
            _ = wait_for_shutdown(&mut self.shutdown) => Wake::Shutdown,
            _ = self.reconnect.notified() => Wake::Reconnect,
        }
    }
}

async fn connect_to_connector(
    connector: &dyn IConnector,
    table_filter: &str,
) -> errors::Result<Box<dyn IConnection>> {
    let mut connection = connector.connect().await?;

    let prepared = async {
        connection.subscribe(table_filter).await?;
        connection.rollback().await
    }
    .await;

    if let Err(error) = prepared {
        if let Err(disconnect_error) = connection.disconnect().await {
            log::warn!("Failed to release connection after setup failure: {disconnect_error}");
        }
        return Err(error);
    }

    Ok(connection)
}

/// Fetches one batch, dispatches it and acknowledges it. The ack happens
/// whatever the per-row outcome was.
async fn poll_once(
    connection: &mut dyn IConnection,
    dispatcher: &BatchDispatcher,
    batch_size: usize,
    idle_sleep: Duration,
) -> errors::Result<()> {
    let batch = connection.fetch_without_ack(batch_size).await?;

    if batch.is_empty() {
        if batch.id != Batch::EMPTY_ID {
            connection.ack(batch.id).await?;
        }
        log::debug!("No new changes found, waiting for next iteration...");
        tokio::time::sleep(idle_sleep).await;
        return Ok(());
    }

    log::debug!(
        "Received batch {} with {} entries",
        batch.id,
        batch.entries.len()
    );

    let summary = dispatcher.dispatch(&batch.entries).await;
    connection.ack(batch.id).await?;
    summary.log();

    Ok(())
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping {
            return;
        }

        if shutdown.changed().await.is_err() {
            // handle dropped without shutdown: keep running detached
            std::future::pending::<()>().await;
        }
    }
}

async fn interruptible<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    future: F,
) -> Option<F::Output> {
    tokio::select! {
        output = future => Some(output),
        _ = wait_for_shutdown(shutdown) => None,
    }
}
