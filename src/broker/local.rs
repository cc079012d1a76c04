use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::{Broker, Message, MessageHandler};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub const DEFAULT_ENDPOINT: &str = "local";
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// In-process message bus, one broadcast channel per topic.
///
/// Several brokers connected to the same bus see each other's messages.
pub struct LocalBus {
    name: String,
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Message>>>,
}

impl LocalBus {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_capacity(name, DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(name: &str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn receiver(&self, topic: &str) -> Result<broadcast::Receiver<Message>> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|e| RuntimeError::Broker(e.to_string()))?;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }

    /// Drops the topic channel once nobody listens on it.
    fn release(&self, topic: &str) -> Result<()> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|e| RuntimeError::Broker(e.to_string()))?;
        if topics
            .get(topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            topics.remove(topic);
        }
        Ok(())
    }

    /// Topics that currently have at least one channel open.
    pub fn topic_count(&self) -> usize {
        self.topics.lock().map(|topics| topics.len()).unwrap_or(0)
    }

    /// Number of subscribers that received the message.
    fn publish(&self, message: Message) -> Result<usize> {
        let topics = self
            .topics
            .lock()
            .map_err(|e| RuntimeError::Broker(e.to_string()))?;
        Ok(topics
            .get(&message.topic)
            .and_then(|sender| sender.send(message).ok())
            .unwrap_or(0))
    }
}

/// Broker backend over a [`LocalBus`].
pub struct LocalBroker {
    endpoint: String,
    shared_bus: Option<Arc<LocalBus>>,
    bus: Option<Arc<LocalBus>>,
    handlers: HashMap<String, MessageHandler>,
    subscriptions: HashMap<String, JoinHandle<()>>,
    logger: Logger,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            shared_bus: None,
            bus: None,
            handlers: HashMap::new(),
            subscriptions: HashMap::new(),
            logger: Logger::detached(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(RuntimeError::InvalidInput("endpoint cannot be empty".into()));
        }
        self.endpoint = endpoint.to_string();
        Ok(self)
    }

    /// Connects to an existing bus instead of a private one.
    pub fn with_bus(mut self, bus: Arc<LocalBus>) -> Self {
        self.endpoint = bus.name().to_string();
        self.shared_bus = Some(bus);
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("broker.local");
        self
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_some()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn attach(&mut self, bus: &LocalBus, topic: &str, handler: MessageHandler) -> Result<()> {
        let mut receiver = bus.receiver(topic)?;
        let logger = self.logger.clone();
        let topic_name = topic.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => handler(message).await,
                    Err(RecvError::Lagged(skipped)) => {
                        logger.warn(format!(
                            "subscriber on '{}' lagged, {} messages dropped",
                            topic_name, skipped
                        ));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.subscriptions.insert(topic.to_string(), task) {
            previous.abort();
        }
        self.logger.debug(format!("subscribed to '{}'", topic));
        Ok(())
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn run(&mut self) -> Result<()> {
        self.connect().await?;
        let bus = self
            .bus
            .clone()
            .ok_or_else(|| RuntimeError::Broker("bus vanished after connect".into()))?;
        let handlers: Vec<(String, MessageHandler)> = self
            .handlers
            .iter()
            .map(|(topic, handler)| (topic.clone(), handler.clone()))
            .collect();
        for (topic, handler) in handlers {
            self.attach(&bus, &topic, handler)?;
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        if self.bus.is_none() {
            let bus = self
                .shared_bus
                .clone()
                .unwrap_or_else(|| LocalBus::new(&self.endpoint));
            self.logger.info(format!("connected to bus '{}'", bus.name()));
            self.bus = Some(bus);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| RuntimeError::InvalidState("broker is not connected".into()))?;
        let delivered = bus.publish(Message::new(topic, payload))?;
        self.logger
            .debug(format!("published to '{}' ({} subscribers)", topic, delivered));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, handler: MessageHandler) -> Result<()> {
        if topic.is_empty() {
            return Err(RuntimeError::InvalidInput("topic cannot be empty".into()));
        }
        self.handlers.insert(topic.to_string(), handler.clone());
        if let Some(bus) = self.bus.clone() {
            self.attach(&bus, topic, handler)?;
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        let handler = self.handlers.remove(topic);
        let subscription = self.subscriptions.remove(topic);
        if handler.is_none() && subscription.is_none() {
            return Err(RuntimeError::InvalidInput(format!(
                "topic {} does not exist",
                topic
            )));
        }
        if let Some(task) = subscription {
            task.abort();
            // the receiver is dropped with the task
            let _ = task.await;
            if let Some(bus) = &self.bus {
                bus.release(topic)?;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(bus) = self.bus.take() else {
            return Err(RuntimeError::InvalidState("broker cannot be closed: not connected".into()));
        };
        for (topic, task) in self.subscriptions.drain() {
            task.abort();
            let _ = task.await;
            bus.release(&topic)?;
        }
        self.logger.info("broker closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::message_handler;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn forwarding(tx: mpsc::UnboundedSender<Message>) -> MessageHandler {
        message_handler(move |message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
            }
        })
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Message> {
        timeout(Duration::from_secs(2), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let broker = LocalBroker::new();
        let err = broker.publish("t", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_run_attaches_handlers_registered_beforehand() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut broker = LocalBroker::new();
        broker.subscribe("orders", forwarding(tx)).await.unwrap();
        assert!(broker.subscribed_topics().is_empty());

        broker.run().await.unwrap();
        assert_eq!(broker.subscribed_topics(), vec!["orders".to_string()]);

        broker.publish("orders", Bytes::from_static(b"42")).await.unwrap();
        let message = next(&mut rx).await.unwrap();
        assert_eq!(message.topic, "orders");
        assert_eq!(message.payload_text(), "42");
    }

    #[tokio::test]
    async fn test_per_topic_order_is_preserved() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut broker = LocalBroker::new();
        broker.run().await.unwrap();
        broker.subscribe("seq", forwarding(tx)).await.unwrap();

        for i in 0..20 {
            broker.publish("seq", Bytes::from(i.to_string())).await.unwrap();
        }
        for i in 0..20 {
            assert_eq!(next(&mut rx).await.unwrap().payload_text(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_shared_bus_connects_brokers() {
        let bus = LocalBus::new("cluster");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut consumer = LocalBroker::new().with_bus(bus.clone());
        consumer.subscribe("events", forwarding(tx)).await.unwrap();
        consumer.run().await.unwrap();

        let mut producer = LocalBroker::new().with_bus(bus);
        producer.run().await.unwrap();
        assert_eq!(producer.endpoint(), "cluster");
        producer.publish("events", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(next(&mut rx).await.unwrap().payload_text(), "hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut broker = LocalBroker::new();
        broker.subscribe("a", forwarding(tx)).await.unwrap();
        broker.run().await.unwrap();

        broker.unsubscribe("a").await.unwrap();
        assert!(broker.unsubscribe("a").await.is_err());
        broker.publish("a", Bytes::from_static(b"dropped")).await.unwrap();
        assert!(next(&mut rx).await.is_none());

        broker.close().await.unwrap();
        assert!(!broker.is_connected());
        assert!(matches!(broker.close().await, Err(RuntimeError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_idle_topics_are_released() {
        let bus = LocalBus::new("pruned");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut first = LocalBroker::new().with_bus(bus.clone());
        let mut second = LocalBroker::new().with_bus(bus.clone());
        first.run().await.unwrap();
        second.run().await.unwrap();

        for topic in ["a", "b", "c"] {
            first.subscribe(topic, forwarding(tx.clone())).await.unwrap();
        }
        second.subscribe("a", forwarding(tx.clone())).await.unwrap();
        assert_eq!(bus.topic_count(), 3);

        first.unsubscribe("b").await.unwrap();
        assert_eq!(bus.topic_count(), 2);

        // still watched by the second broker
        first.unsubscribe("a").await.unwrap();
        assert_eq!(bus.topic_count(), 2);

        first.close().await.unwrap();
        assert_eq!(bus.topic_count(), 1);
        second.close().await.unwrap();
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        assert!(LocalBroker::new().with_endpoint("").is_err());
    }
}
