//! Storage backend selection.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{BrokerConfig, StorageKind};
use crate::lifecycle::Shutdown;
use crate::storage::channel::{AmqpChannel, QueueChannel};
use crate::storage::{FileStorage, MessageStorage, QueueStorage};
use crate::types::BrokerResult;

/// The constructed backend plus whatever runs alongside it.
pub enum StorageHandle {
    File(Arc<FileStorage>),
    Queue {
        storage: Arc<QueueStorage>,
        listener: JoinHandle<()>,
    },
}

impl StorageHandle {
    /// The backend as the coordinator sees it.
    pub fn storage(&self) -> Arc<dyn MessageStorage> {
        match self {
            StorageHandle::File(storage) => storage.clone(),
            StorageHandle::Queue { storage, .. } => storage.clone(),
        }
    }

    /// The filesystem backend, which the consumer pump needs.
    pub fn file(&self) -> Option<Arc<FileStorage>> {
        match self {
            StorageHandle::File(storage) => Some(storage.clone()),
            StorageHandle::Queue { .. } => None,
        }
    }
}

/// Build the backend selected by `storage.kind`.
pub async fn build_storage(config: &BrokerConfig, shutdown: &Shutdown) -> BrokerResult<StorageHandle> {
    match config.storage.kind {
        StorageKind::File => {
            let storage = FileStorage::new(&config.storage, config.broker.timeout())?;
            Ok(StorageHandle::File(Arc::new(storage)))
        }
        StorageKind::Queue => {
            let channel = AmqpChannel::connect(&config.storage.queue).await?;
            build_queue_storage(Arc::new(channel), config, shutdown).await
        }
    }
}

/// Build a queue backend over an existing transport and start its listener.
pub async fn build_queue_storage(
    channel: Arc<dyn QueueChannel>,
    config: &BrokerConfig,
    shutdown: &Shutdown,
) -> BrokerResult<StorageHandle> {
    let storage = Arc::new(QueueStorage::new(
        channel,
        &config.storage.queue,
        config.broker.timeout(),
    ));
    let listener = storage.start_listener(shutdown.subscribe()).await?;
    Ok(StorageHandle::Queue { storage, listener })
}
