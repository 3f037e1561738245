use std::{env, sync::Arc};

use clap::Parser;
use log::info;

pub mod adapter;
mod command;
pub mod config;
pub mod errors;
pub mod lock;
pub mod model;
pub mod sync;
#[cfg(test)]
mod testing;

use crate::{
    adapter::{elasticsearch::ElasticsearchConnection, postgres::PostgresConnection},
    command::SubCommand,
    config::Configuration,
    sync::{
        connector::PostgresConnector,
        handler::{HandlerRegistry, PostTableHandler},
        manager::DataSyncManager,
        service::IndexSyncService,
    },
};

#[tokio::main]
async fn main() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    let args = command::Command::parse();

    if let Err(error) = execute(args.action).await {
        log::error!("{error}");
        std::process::exit(1);
    }
}

async fn execute(action: SubCommand) -> errors::Result<()> {
    match action {
        SubCommand::Run(command) => {
            info!("config-file: {}", command.value.config_file);

            let config = command.value.read_config_from_file()?;
            let (manager, connection) = build_manager(config).await?;

            manager.start().await;
            info!("Sync status: {}", manager.status());

            wait_for_signals(&manager).await;

            manager.shutdown().await;
            connection.close().await;
        }
        SubCommand::Resync(command) => {
            let config = command.value.read_config_from_file()?;
            let (manager, connection) = build_manager(config).await?;

            let synced = manager.trigger_full_resync().await;
            info!("{synced} posts indexed");

            connection.close().await;
        }
        SubCommand::SyncOne(command) => {
            let config = command.value.read_config_from_file()?;
            let (manager, connection) = build_manager(config).await?;

            let synced = manager.sync_one(command.id).await;
            connection.close().await;

            if !synced? {
                log::warn!("Post {} was not indexed", command.id);
            }
        }
        SubCommand::DeleteOne(command) => {
            let config = command.value.read_config_from_file()?;
            let (manager, connection) = build_manager(config).await?;

            let deleted = manager.delete_one(command.id).await;
            connection.close().await;

            deleted?;
        }
        SubCommand::DeleteMany(command) => {
            let config = command.value.read_config_from_file()?;
            let (manager, connection) = build_manager(config).await?;

            let deleted = manager.delete_many(&command.ids).await;
            connection.close().await;

            info!("{deleted}/{} posts removed from index", command.ids.len());
        }
        SubCommand::Reconcile(command) => {
            let config = command.value.read_config_from_file()?;
            let (manager, connection) = build_manager(config).await?;

            let indexed = manager.reconcile(&command.table, command.id).await;
            connection.close().await;

            info!(
                "Record {}.{} is {}",
                command.table,
                command.id,
                if indexed? { "indexed" } else { "not indexed" }
            );
        }
    }

    Ok(())
}

async fn build_manager(
    config: Configuration,
) -> errors::Result<(DataSyncManager, Arc<PostgresConnection>)> {
    let connection = Arc::new(PostgresConnection::new(&config.source.connection));
    if let Err(error) = connection.ping().await {
        log::warn!("Source database is not reachable yet: {error}");
    }

    let index = Arc::new(ElasticsearchConnection::new(&config.target.elasticsearch)?);
    if let Err(error) = index.ping().await {
        log::warn!("Search index is not reachable yet: {error}");
    }

    let index_name = config.target.elasticsearch.get_index().to_string();

    let handler = PostTableHandler::new(index.clone(), connection.clone(), &index_name);
    let registry = Arc::new(HandlerRegistry::new(vec![Arc::new(handler)]));
    let service = Arc::new(IndexSyncService::new(
        connection.clone(),
        index,
        &index_name,
    ));

    let connector = Arc::new(PostgresConnector::new(
        config.source.connection.clone(),
        config.source.get_stream_id(),
    ));

    let manager = DataSyncManager::new(config, connector, registry, service);

    Ok((manager, connection))
}

#[cfg(unix)]
async fn wait_for_signals(manager: &DataSyncManager) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(error) => {
            log::warn!("Failed to listen for SIGHUP: {error}");
            wait_for_interrupt().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_interrupt() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    wait_for_interrupt().await;
                    return;
                }

                info!("Received SIGHUP, restarting sync loop (configuration is not reloaded)");
                manager.restart().await;
                info!("Sync status: {}", manager.status());
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_manager: &DataSyncManager) {
    wait_for_interrupt().await;
}

async fn wait_for_interrupt() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {error}");
        return;
    }
    info!("Received Ctrl-C, shutting down");
}
