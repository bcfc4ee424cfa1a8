//! Queue transports for the queue storage backend.
//!
//! `AmqpChannel` talks to RabbitMQ (or any AMQP 0-9-1 broker) through
//! `lapin`. `MemoryChannel` keeps queues in process, which is what tests and
//! single-process setups use.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::config::QueueConfig;
use crate::types::{BrokerError, BrokerResult};

/// Raw message payloads consumed from a queue.
pub type PayloadStream = BoxStream<'static, Vec<u8>>;

/// Minimal publish/consume capability over named queues.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BrokerResult<()>;

    /// Start consuming `queue`. Messages are acknowledged on delivery.
    async fn consume(&self, queue: &str) -> BrokerResult<PayloadStream>;
}

/// AMQP connection with one channel, both queues declared up front.
pub struct AmqpChannel {
    _connection: Connection,
    channel: Channel,
}

impl AmqpChannel {
    /// Connect and declare the request and response queues.
    pub async fn connect(config: &QueueConfig) -> BrokerResult<Self> {
        let connection =
            Connection::connect(&config.amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        for queue in [&config.request_queue, &config.response_queue] {
            let options = QueueDeclareOptions {
                durable: config.durable,
                ..QueueDeclareOptions::default()
            };
            channel
                .queue_declare(queue, options, FieldTable::default())
                .await?;
        }

        tracing::info!(
            request_queue = %config.request_queue,
            response_queue = %config.response_queue,
            durable = config.durable,
            "AMQP channel ready"
        );

        Ok(Self {
            _connection: connection,
            channel,
        })
    }
}

#[async_trait]
impl QueueChannel for AmqpChannel {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BrokerResult<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> BrokerResult<PayloadStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("message-broker-{}", uuid::Uuid::new_v4().simple()),
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let queue = queue.to_string();
        Ok(consumer
            .filter_map(move |delivery| {
                let payload = match delivery {
                    Ok(delivery) => Some(delivery.data),
                    Err(e) => {
                        tracing::error!(queue = %queue, error = %e, "AMQP delivery error");
                        None
                    }
                };
                async move { payload }
            })
            .boxed())
    }
}

struct MemoryQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MemoryQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

/// In-process queues. Each queue supports a single consumer.
#[derive(Default)]
pub struct MemoryChannel {
    queues: DashMap<String, MemoryQueue>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BrokerResult<()> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(MemoryQueue::new)
            .tx
            .send(payload)
            .map_err(|_| BrokerError::Queue(format!("queue {queue} is closed")))
    }

    async fn consume(&self, queue: &str) -> BrokerResult<PayloadStream> {
        let rx = {
            let entry = self
                .queues
                .entry(queue.to_string())
                .or_insert_with(MemoryQueue::new);
            let mut slot = entry
                .rx
                .lock()
                .map_err(|_| BrokerError::Queue("memory queue lock poisoned".into()))?;
            slot.take()
        };

        let rx = rx.ok_or_else(|| BrokerError::Queue(format!("queue {queue} already has a consumer")))?;
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        })
        .boxed())
    }
}
