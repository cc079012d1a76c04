//! Service runtime: capability table plus the start/serve/stop lifecycle.
//!
//! A [`Runtime`] is produced by [`RuntimeBuilder`] and moves through
//! `Assembling → Serving → Stopping → Stopped`. There is no way back from
//! `Stopped`; build a new runtime instead.

pub mod authn_routes;
pub mod builder;

pub use builder::{BuildContext, RuntimeBuilder};

use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::{
    AuthN, Broker, Configuration, HandlerFn, MessageHandler, Processor, Registry, Service,
    ServiceInfo, Store, Transport,
};
use bytes::Bytes;
use http::Method;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub const GOODBYE: &str = "Goodbye and thanks for all the fish";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Assembling,
    Serving,
    Stopping,
    Stopped,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Assembling => "assembling",
            Self::Serving => "serving",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Requests shutdown of a runtime blocked in [`Runtime::run`].
///
/// Cloneable and usable from any task. Triggering before `run` is reached
/// makes `run` return as soon as startup completes.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives in `self`, so the channel cannot close while waiting
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

type ShutdownHook = Box<dyn FnOnce() + Send + Sync>;

/// An assembled service.
pub struct Runtime {
    service: ServiceInfo,
    logger: Logger,
    state: RuntimeState,
    configuration: Option<Box<dyn Configuration>>,
    registry: Option<Box<dyn Registry>>,
    transport: Option<Box<dyn Transport>>,
    broker: Option<Box<dyn Broker>>,
    store: Option<Box<dyn Store>>,
    authn: Option<Arc<dyn AuthN>>,
    processor: Option<Box<dyn Processor>>,
    hooks: Vec<ShutdownHook>,
    shutdown: ShutdownHandle,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.service.id
    }

    pub fn name(&self) -> &str {
        &self.service.name
    }

    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RuntimeState::Serving
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn configuration(&self) -> Option<&dyn Configuration> {
        self.configuration.as_deref()
    }

    pub fn registry(&self) -> Option<&dyn Registry> {
        self.registry.as_deref()
    }

    pub fn transport(&self) -> Option<&dyn Transport> {
        self.transport.as_deref()
    }

    pub fn broker(&self) -> Option<&dyn Broker> {
        self.broker.as_deref()
    }

    pub fn store(&self) -> Option<&dyn Store> {
        self.store.as_deref()
    }

    pub fn authn(&self) -> Option<&dyn AuthN> {
        self.authn.as_deref()
    }

    pub fn processor(&self) -> Option<&dyn Processor> {
        self.processor.as_deref()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Registers a closure run once teardown has finished in [`Runtime::run`].
    pub fn hook_shutdown(&mut self, hook: impl FnOnce() + Send + Sync + 'static) {
        self.hooks.push(Box::new(hook));
    }

    fn missing(&self, capability: &'static str) -> RuntimeError {
        let err = RuntimeError::MissingCapability(capability);
        self.logger.error(&err);
        err
    }

    /// Brings every installed capability up in order: registry, broker,
    /// authn routes, transport. Returns once the transport is serving.
    ///
    /// Startup is all or nothing. On the first failure the broker is closed
    /// if it had been started and the runtime ends up `Stopped`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != RuntimeState::Assembling {
            return Err(RuntimeError::InvalidState(format!(
                "runtime cannot start while {}",
                self.state
            )));
        }

        let mut broker_running = false;
        if let Err(err) = self.bring_up(&mut broker_running).await {
            self.abandon_startup(broker_running).await;
            return Err(err);
        }

        self.state = RuntimeState::Serving;
        self.logger.info(format!(
            "service '{}' ({}) is running",
            self.service.name, self.service.id
        ));
        Ok(())
    }

    async fn bring_up(&mut self, broker_running: &mut bool) -> Result<()> {
        if let Some(registry) = &self.registry {
            self.logger.info("registry setup");
            registry
                .register()
                .await
                .map_err(|e| self.startup_failure("registry", e))?;
        }

        if let Some(broker) = self.broker.as_mut() {
            self.logger.info("broker setup");
            if let Err(e) = broker.run().await {
                return Err(self.startup_failure("broker", e));
            }
            *broker_running = true;
        }

        if let Some(authn) = self.authn.clone() {
            self.logger.info("authn setup");
            let Some(transport) = self.transport.as_mut() else {
                let missing = RuntimeError::MissingCapability("transport");
                return Err(self.startup_failure("transport", missing));
            };
            if let Err(e) = authn_routes::install(&mut **transport, authn, &self.logger) {
                return Err(self.startup_failure("authn", e));
            }
        }

        if let Some(transport) = self.transport.as_mut() {
            self.logger.info("transport setup");
            if let Err(e) = transport.run().await {
                return Err(self.startup_failure("transport", e));
            }
        }
        Ok(())
    }

    async fn abandon_startup(&mut self, broker_running: bool) {
        if broker_running {
            if let Some(broker) = self.broker.as_mut() {
                if let Err(e) = broker.close().await {
                    self.logger
                        .warn(format!("broker close after failed startup: {}", e));
                }
            }
        }
        self.state = RuntimeState::Stopped;
    }

    fn startup_failure(&self, capability: &'static str, source: RuntimeError) -> RuntimeError {
        let err = RuntimeError::fatal(capability, source);
        self.logger.error(&err);
        err
    }

    /// Starts, serves until a shutdown signal, stops and runs the hooks.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        shutdown_signal(&self.shutdown).await;
        self.logger.info("shutdown signal received");

        let result = self.stop().await;
        for hook in self.hooks.drain(..) {
            hook();
        }
        self.logger.warn(GOODBYE);
        result
    }

    /// Tears down broker, transport and processor, in that order.
    ///
    /// Every step runs even when an earlier one fails; the failures come back
    /// together as [`RuntimeError::Teardown`]. Outside `Serving` this does
    /// nothing.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != RuntimeState::Serving {
            self.logger
                .debug(format!("stop ignored while {}", self.state));
            return Ok(());
        }
        self.state = RuntimeState::Stopping;

        let mut failures = Vec::new();
        if let Some(broker) = self.broker.as_mut() {
            if let Err(e) = broker.close().await {
                self.logger.error(format!("broker close failed: {}", e));
                failures.push(format!("broker: {}", e));
            }
        }
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.stop().await {
                self.logger.error(format!("transport stop failed: {}", e));
                failures.push(format!("transport: {}", e));
            }
        }
        if let Some(processor) = self.processor.as_mut() {
            if let Err(e) = processor.close() {
                self.logger.error(format!("processor close failed: {}", e));
                failures.push(format!("processor: {}", e));
            }
        }

        self.state = RuntimeState::Stopped;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Teardown(failures))
        }
    }

    pub fn handler(&mut self, method: Method, path: &str, handler: HandlerFn) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.handler(method, path, handler),
            None => Err(self.missing("transport")),
        }
    }

    pub fn get(&mut self, path: &str, handler: HandlerFn) -> Result<()> {
        self.handler(Method::GET, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: HandlerFn) -> Result<()> {
        self.handler(Method::POST, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: HandlerFn) -> Result<()> {
        self.handler(Method::PUT, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: HandlerFn) -> Result<()> {
        self.handler(Method::DELETE, path, handler)
    }

    pub async fn subscribe(&mut self, topic: &str, handler: MessageHandler) -> Result<()> {
        match self.broker.as_mut() {
            Some(broker) => broker.subscribe(topic, handler).await,
            None => Err(self.missing("broker")),
        }
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        match self.broker.as_mut() {
            Some(broker) => broker.unsubscribe(topic).await,
            None => Err(self.missing("broker")),
        }
    }

    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        match self.broker.as_deref() {
            Some(broker) => broker.publish(topic, payload.into()).await,
            None => Err(self.missing("broker")),
        }
    }

    pub async fn process(&self, input: JsonValue) -> Result<JsonValue> {
        match self.processor.as_deref() {
            Some(processor) => processor.process(input).await,
            None => Err(self.missing("processor")),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("service", &self.service)
            .field("state", &self.state)
            .field("configuration", &self.configuration.is_some())
            .field("registry", &self.registry.is_some())
            .field("transport", &self.transport.is_some())
            .field("broker", &self.broker.is_some())
            .field("store", &self.store.is_some())
            .field("authn", &self.authn.is_some())
            .field("processor", &self.processor.is_some())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Service for Runtime {
    fn id(&self) -> &str {
        &self.service.id
    }

    fn name(&self) -> &str {
        &self.service.name
    }
}

async fn shutdown_signal(handle: &ShutdownHandle) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = handle.triggered() => {},
    }
}
