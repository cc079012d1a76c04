use crate::core::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Message delivered to a topic subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`MessageHandler`].
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Publish/subscribe message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connects, then attaches every handler registered so far.
    async fn run(&mut self) -> Result<()>;

    fn endpoint(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Records a handler; attached immediately when already connected.
    async fn subscribe(&mut self, topic: &str, handler: MessageHandler) -> Result<()>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
