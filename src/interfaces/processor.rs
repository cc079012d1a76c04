use crate::core::Result;
use crate::interfaces::ServiceInfo;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Payload processor attached to the service.
#[async_trait]
pub trait Processor: Send + Sync {
    fn init(&mut self, service: &ServiceInfo) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    async fn process(&self, input: JsonValue) -> Result<JsonValue>;
}
