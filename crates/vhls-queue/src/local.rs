//! In-process publish/subscribe bus.
//!
//! Fallback backend when no broker is configured. Single-process,
//! at-most-once, no persistence: messages published with no live
//! subscription are dropped, and nothing survives a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{ConsumeOptions, MessageHandler, QueueBackend};
use crate::error::{QueueError, QueueResult};
use crate::message::QueueMessage;

/// In-process queue backend.
pub struct LocalBus {
    topics: StdMutex<HashMap<String, Vec<mpsc::UnboundedSender<QueueMessage>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            topics: StdMutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for LocalBus {
    async fn produce(&self, topic: &str, message: QueueMessage) -> QueueResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut topics = self
            .topics
            .lock()
            .map_err(|_| QueueError::publish_failed("bus state poisoned"))?;

        match topics.get_mut(topic) {
            Some(senders) => {
                // Prune subscriptions whose dispatch task is gone.
                senders.retain(|tx| tx.send(message.clone()).is_ok());
                if senders.is_empty() {
                    debug!(topic, "No live subscribers, message dropped");
                }
            }
            None => {
                debug!(topic, "No subscribers, message dropped");
            }
        }

        Ok(id.to_string())
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

        if options.from_beginning {
            debug!(topic, "Local bus keeps no history, from_beginning ignored");
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<QueueMessage>();

        {
            let mut topics = self
                .topics
                .lock()
                .map_err(|_| QueueError::subscribe_failed("bus state poisoned"))?;
            topics.entry(topic.to_string()).or_default().push(tx);
        }

        let topic = topic.to_string();
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = handler(msg).await {
                    warn!(topic = %topic, error = %e, "Handler failed");
                }
            }
            debug!(topic = %topic, "Local dispatch loop stopped");
        });

        self.tasks.lock().await.push(handle);
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the senders ends each dispatch loop after it drains.
        if let Ok(mut topics) = self.topics.lock() {
            topics.clear();
        }

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}
