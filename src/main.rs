use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use message_broker::backend::BackendClient;
use message_broker::config::{load_config, validation::validate_config, BrokerConfig, ConfigError};
use message_broker::lifecycle::{drain_tasks, wait_for_signal, Shutdown};
use message_broker::observability::{logging, metrics};
use message_broker::storage::{build_storage, StorageHandle};
use message_broker::workers::{CleanupService, ConsumerService};
use message_broker::{HttpServer, MessageBroker};

#[derive(Parser)]
#[command(name = "message-broker", version, about = "Decoupling HTTP message broker")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BrokerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "message-broker starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        storage = ?config.storage.kind,
        advanced_mode = config.broker.advanced_mode,
        timeout_secs = config.broker.timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let storage = build_storage(&config, &shutdown).await?;
    let broker = Arc::new(MessageBroker::new(&config.broker, storage.storage()));

    let mut workers = Vec::new();
    if let Some(file) = storage.file() {
        if config.consumer.enabled {
            let client = BackendClient::new(&config.backend)?;
            let consumer = ConsumerService::new(file.clone(), client, &config.consumer);
            workers.push(tokio::spawn(consumer.run(shutdown.subscribe())));
        }
        if config.janitor.enabled {
            let janitor = CleanupService::new(file.staging_dir(), &config.janitor);
            workers.push(tokio::spawn(janitor.run(shutdown.subscribe())));
        }
    }
    if config.broker.cache_outlives_waiters {
        let every = Duration::from_secs(config.broker.cache_lifetime_secs.max(1));
        workers.push(tokio::spawn(broker.clone().run_cache_purge(every, shutdown.subscribe())));
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config.listener, broker);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let server_result = tokio::select! {
        _ = wait_for_signal() => None,
        result = &mut server_task => Some(result),
    };
    shutdown.trigger();

    let server_result = match server_result {
        Some(result) => result,
        None => server_task.await,
    };
    drain_tasks(workers, "worker").await;
    if let StorageHandle::Queue { listener, .. } = storage {
        drain_tasks(vec![listener], "response listener").await;
    }

    server_result??;
    tracing::info!("Shutdown complete");
    Ok(())
}
