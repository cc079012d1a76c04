use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::Store;
use crate::vault::VaultConfig;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Store backend keeping JSON objects as secrets under `<namespace>/<key>`.
#[derive(Debug, Clone)]
pub struct VaultStore {
    config: VaultConfig,
    namespace: String,
    logger: Logger,
}

impl VaultStore {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            namespace: DEFAULT_NAMESPACE.to_string(),
            logger: Logger::detached(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Result<Self> {
        let namespace = namespace.trim_matches('/');
        if namespace.is_empty() {
            return Err(RuntimeError::InvalidInput("namespace cannot be empty".into()));
        }
        self.namespace = namespace.to_string();
        Ok(self)
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("store.vault");
        self
    }

    fn path(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(RuntimeError::InvalidInput("key cannot be empty".into()));
        }
        Ok(format!("{}/{}", self.namespace, key.trim_start_matches('/')))
    }
}

fn into_object(value: JsonValue) -> Result<JsonMap<String, JsonValue>> {
    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(RuntimeError::InvalidInput(format!(
            "secret value must be a JSON object, got {}",
            other
        ))),
    }
}

#[async_trait]
impl Store for VaultStore {
    async fn create(&self, key: &str, value: JsonValue) -> Result<()> {
        let path = self.path(key)?;
        let data = into_object(value)?;
        let conn = self.config.connect()?;
        conn.write(&path, &data).await?;
        conn.close();
        self.logger.debug(format!("wrote '{}'", path));
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<JsonValue> {
        let path = self.path(key)?;
        let conn = self.config.connect()?;
        let data = conn
            .read(&path)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("key '{}'", key)))?;
        conn.close();
        Ok(JsonValue::Object(data))
    }

    async fn update(&self, key: &str, value: JsonValue) -> Result<()> {
        self.create(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        let conn = self.config.connect()?;
        if !conn.delete(&path).await? {
            return Err(RuntimeError::NotFound(format!("key '{}'", key)));
        }
        conn.close();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let conn = self.config.connect()?;
        let keys = conn.list(&self.namespace).await?;
        conn.close();
        Ok(keys)
    }
}
