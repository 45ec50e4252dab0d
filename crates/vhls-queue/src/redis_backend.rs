//! Redis Streams backend.
//!
//! One stream per topic, one consumer group shared by all workers, and a
//! blocking read loop per subscription. Messages are XACKed and XDELed
//! after handler dispatch, so a handler error never blocks the stream.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ConsumeOptions, MessageHandler, QueueBackend};
use crate::error::{QueueError, QueueResult};
use crate::message::QueueMessage;

const READ_COUNT: usize = 10;
const BLOCK_MS: u64 = 5_000;

/// Queue backend over Redis Streams.
pub struct RedisStreamsQueue {
    client: redis::Client,
    group: String,
    stream_prefix: String,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RedisStreamsQueue {
    /// Connect to the broker and verify the connection with a PING.
    pub async fn connect(
        redis_url: &str,
        consumer_group: &str,
        stream_prefix: &str,
    ) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            client,
            group: consumer_group.to_string(),
            stream_prefix: stream_prefix.to_string(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn stream_name(&self, topic: &str) -> String {
        stream_name_for(&self.stream_prefix, topic)
    }

    /// Create the consumer group, tolerating one that already exists.
    async fn ensure_group(
        conn: &mut redis::aio::MultiplexedConnection,
        stream: &str,
        group: &str,
        from_beginning: bool,
    ) -> QueueResult<()> {
        let start_id = if from_beginning { "0" } else { "$" };

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group {} on {}", group, stream),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists on {}", group, stream);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }
}

fn stream_name_for(prefix: &str, topic: &str) -> String {
    format!("{}:{}", prefix, topic)
}

/// One delivery read from the stream. `payload` is `None` when the entry
/// did not carry a parseable payload field.
type RawEntry = (String, Option<serde_json::Value>);

async fn read_batch(
    conn: &mut redis::aio::MultiplexedConnection,
    stream: &str,
    group: &str,
    consumer: &str,
) -> QueueResult<Vec<RawEntry>> {
    let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
        .arg("GROUP")
        .arg(group)
        .arg(consumer)
        .arg("COUNT")
        .arg(READ_COUNT)
        .arg("BLOCK")
        .arg(BLOCK_MS)
        .arg("STREAMS")
        .arg(stream)
        .arg(">")
        .query_async(conn)
        .await?;

    let mut entries = Vec::new();
    for stream_key in reply.keys {
        for entry in stream_key.ids {
            let payload = match entry.map.get("payload") {
                Some(redis::Value::BulkString(bytes)) => {
                    serde_json::from_slice(bytes).ok()
                }
                _ => None,
            };
            entries.push((entry.id.clone(), payload));
        }
    }
    Ok(entries)
}

async fn ack_entry(
    conn: &mut redis::aio::MultiplexedConnection,
    stream: &str,
    group: &str,
    message_id: &str,
) {
    let ack: Result<(), redis::RedisError> = redis::cmd("XACK")
        .arg(stream)
        .arg(group)
        .arg(message_id)
        .query_async(conn)
        .await;
    if let Err(e) = ack {
        warn!(message_id, error = %e, "Failed to XACK message");
        return;
    }

    let del: Result<(), redis::RedisError> = redis::cmd("XDEL")
        .arg(stream)
        .arg(message_id)
        .query_async(conn)
        .await;
    if let Err(e) = del {
        warn!(message_id, error = %e, "Failed to XDEL message");
    }
}

#[async_trait]
impl QueueBackend for RedisStreamsQueue {
    async fn produce(&self, topic: &str, message: QueueMessage) -> QueueResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let stream = self.stream_name(topic);
        let payload = serde_json::to_string(&message.payload)?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let message_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        debug!(topic, message_id, "Published message");
        Ok(message_id)
    }

    async fn consume(
        &self,
        topic: &str,
        handler: MessageHandler,
        options: ConsumeOptions,
    ) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let stream = self.stream_name(topic);
        let group = self.group.clone();
        let consumer = format!("{}-{}", group, Uuid::new_v4());
        let topic = topic.to_string();

        // Dedicated connection: the blocking read must not stall other
        // commands multiplexed on a shared connection.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Self::ensure_group(&mut conn, &stream, &group, options.from_beginning).await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            info!(topic = %topic, consumer = %consumer, "Consumer loop started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let batch = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = read_batch(&mut conn, &stream, &group, &consumer) => result,
                };

                match batch {
                    Ok(entries) => {
                        for (message_id, payload) in entries {
                            match payload {
                                Some(value) => {
                                    let msg = QueueMessage::new(topic.clone(), value);
                                    if let Err(e) = handler(msg).await {
                                        warn!(
                                            topic = %topic,
                                            message_id = %message_id,
                                            error = %e,
                                            "Handler failed; message is acked anyway"
                                        );
                                    }
                                }
                                None => {
                                    warn!(
                                        topic = %topic,
                                        message_id = %message_id,
                                        "Dropping malformed message"
                                    );
                                }
                            }
                            ack_entry(&mut conn, &stream, &group, &message_id).await;
                        }
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Stream read failed, backing off");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
            debug!(topic = %topic, "Consumer loop stopped");
        });

        self.tasks.lock().await.push(handle);
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
