//! Backend contract shared by the broker and the in-process bus.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::QueueResult;
use crate::message::QueueMessage;

/// Error type handlers may return; it is logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscription handler. Invoked once per message, in delivery order
/// per topic.
pub type MessageHandler =
    Arc<dyn Fn(QueueMessage) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Subscription options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Deliver messages already in the stream before this subscription.
    /// Only meaningful on the broker backend; the local bus has no history.
    pub from_beginning: bool,
}

/// A queue backend: publish to topics and subscribe handlers to them.
///
/// Call signatures are identical across implementations so callers never
/// branch on which backend they got.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Publish a message, returning the backend's message ID.
    async fn produce(&self, topic: &str, message: QueueMessage) -> QueueResult<String>;

    /// Register a handler for a topic. Returns once the subscription is
    /// established; dispatch happens on a background task.
    async fn consume(
        &self,
        topic: &str,
        handler: MessageHandler,
        options: ConsumeOptions,
    ) -> QueueResult<()>;

    /// Stop dispatch tasks and release connections.
    async fn close(&self) -> QueueResult<()>;

    /// Short name for logs ("redis" or "local").
    fn kind(&self) -> &'static str;
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(QueueMessage) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}
