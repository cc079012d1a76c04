//! Payload processors selectable by name.

use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::{Processor, ServiceInfo};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Builds a processor; the logger is the runtime's.
pub type ProcessorFactory = fn(&Logger) -> Box<dyn Processor>;

/// Table of processors known at compile time, keyed by name.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every processor shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", echo_factory);
        registry
    }

    /// Adds a factory, replacing any previous one with the same name.
    pub fn register(&mut self, name: &str, factory: ProcessorFactory) -> &mut Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str, logger: &Logger) -> Result<Box<dyn Processor>> {
        if name.is_empty() {
            return Err(RuntimeError::InvalidInput("plugin name cannot be empty".into()));
        }
        let factory = self.factories.get(name).ok_or_else(|| {
            RuntimeError::InvalidInput(format!("unknown plugin '{}'", name))
        })?;
        Ok(factory(logger))
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn echo_factory(logger: &Logger) -> Box<dyn Processor> {
    Box::new(EchoProcessor::new().with_logger(logger))
}

/// Logs its input and hands it back unchanged.
#[derive(Debug, Clone, Default)]
pub struct EchoProcessor {
    service: Option<ServiceInfo>,
    logger: Logger,
}

impl EchoProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("processor.echo");
        self
    }

    pub fn service(&self) -> Option<&ServiceInfo> {
        self.service.as_ref()
    }
}

#[async_trait]
impl Processor for EchoProcessor {
    fn init(&mut self, service: &ServiceInfo) -> Result<()> {
        self.logger
            .info(format!("echo processor ready for '{}'", service.name));
        self.service = Some(service.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.service = None;
        Ok(())
    }

    async fn process(&self, input: JsonValue) -> Result<JsonValue> {
        self.logger.info(format!("echo: {}", input));
        Ok(input)
    }
}
