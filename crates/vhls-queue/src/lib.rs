//! Topic queue with interchangeable backends.
//!
//! This crate provides:
//! - A `QueueBackend` trait over produce/consume/close
//! - A Redis Streams broker backend with consumer groups
//! - An in-process fallback bus (at-most-once, no persistence)
//! - A `Queue` facade that picks the backend from configuration

pub mod backend;
pub mod error;
pub mod local;
pub mod message;
pub mod redis_backend;

use std::sync::Arc;

use tracing::info;

pub use backend::{handler_fn, ConsumeOptions, HandlerError, MessageHandler, QueueBackend};
pub use error::{QueueError, QueueResult};
pub use local::LocalBus;
pub use message::QueueMessage;
pub use redis_backend::RedisStreamsQueue;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Broker URL; the in-process bus is used when absent.
    pub redis_url: Option<String>,
    /// Consumer group shared by all workers of this service.
    pub consumer_group: String,
    /// Prefix for stream names derived from topics.
    pub stream_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            consumer_group: "vhls:transcoders".to_string(),
            stream_prefix: "vhls:queue".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vhls:transcoders".to_string()),
            stream_prefix: std::env::var("QUEUE_STREAM_PREFIX")
                .unwrap_or_else(|_| "vhls:queue".to_string()),
        }
    }
}

/// Handle to the selected queue backend.
///
/// Backend selection happens once at connect time: Redis Streams when a
/// broker URL is configured, the in-process bus otherwise. Every call
/// after that is backend-agnostic.
#[derive(Clone)]
pub struct Queue {
    backend: Arc<dyn QueueBackend>,
}

impl Queue {
    /// Connect, selecting the backend from the config.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let backend: Arc<dyn QueueBackend> = match config.redis_url.as_deref() {
            Some(url) => {
                let broker =
                    RedisStreamsQueue::connect(url, &config.consumer_group, &config.stream_prefix)
                        .await?;
                info!("Queue connected via Redis Streams broker");
                Arc::new(broker)
            }
            None => {
                info!("No broker configured, using in-process queue");
                Arc::new(LocalBus::new())
            }
        };

        Ok(Self { backend })
    }

    /// Connect using environment configuration.
    pub async fn connect_from_env() -> QueueResult<Self> {
        Self::connect(QueueConfig::from_env()).await
    }

    /// Publish a JSON payload to a topic.
    pub async fn produce(&self, topic: &str, payload: serde_json::Value) -> QueueResult<String> {
        self.backend
            .produce(topic, QueueMessage::new(topic, payload))
            .await
    }

    /// Register a handler for a topic.
    pub async fn consume(
        &self,
        topic: &str,
        handler: MessageHandler,
        options: ConsumeOptions,
    ) -> QueueResult<()> {
        self.backend.consume(topic, handler, options).await
    }

    /// Stop dispatch and release connections.
    pub async fn close(&self) -> QueueResult<()> {
        self.backend.close().await
    }

    /// Which backend this handle talks to ("redis" or "local").
    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc as StdArc, Mutex};

    #[tokio::test]
    async fn test_connect_without_broker_selects_local_bus() {
        let queue = Queue::connect(QueueConfig::default()).await.unwrap();
        assert_eq!(queue.kind(), "local");
    }

    #[tokio::test]
    async fn test_facade_round_trip_on_local_bus() {
        let queue = Queue::connect(QueueConfig::default()).await.unwrap();

        let seen: StdArc<Mutex<Vec<String>>> = StdArc::new(Mutex::new(Vec::new()));
        let sink = StdArc::clone(&seen);
        queue
            .consume(
                "smoke",
                handler_fn(move |msg| {
                    let sink = StdArc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(msg.payload["note"].to_string());
                        Ok(())
                    }
                }),
                ConsumeOptions::default(),
            )
            .await
            .unwrap();

        queue
            .produce("smoke", serde_json::json!({ "note": "hello" }))
            .await
            .unwrap();

        for _ in 0..200 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().unwrap().len(), 1);

        queue.close().await.unwrap();
    }
}
