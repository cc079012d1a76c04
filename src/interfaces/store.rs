use crate::core::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Keyed object/secret storage.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create(&self, key: &str, value: JsonValue) -> Result<()>;

    async fn read(&self, key: &str) -> Result<JsonValue>;

    async fn update(&self, key: &str, value: JsonValue) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys stored under the backend's namespace.
    async fn list(&self) -> Result<Vec<String>>;
}
