use super::{PasswordHasher, UserRecord, validate_credentials, validate_username};
use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::AuthN;
use crate::vault::VaultConfig;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const DEFAULT_MOUNT: &str = "cubbyhole";
const USER_FIELD: &str = "user";

/// AuthN backend storing each record as a secret in a Vault-compatible service.
///
/// The JSON-encoded [`UserRecord`] lives in the `user` field of the secret at
/// `<mount>/<username>`. Every operation opens its own connection.
#[derive(Debug, Clone)]
pub struct VaultAuthN {
    config: VaultConfig,
    mount: String,
    hasher: PasswordHasher,
    logger: Logger,
}

impl VaultAuthN {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            mount: DEFAULT_MOUNT.to_string(),
            hasher: PasswordHasher::default(),
            logger: Logger::detached(),
        }
    }

    pub fn with_mount(mut self, mount: &str) -> Result<Self> {
        let mount = mount.trim_matches('/');
        if mount.is_empty() {
            return Err(RuntimeError::InvalidInput("mount cannot be empty".into()));
        }
        self.mount = mount.to_string();
        Ok(self)
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("authn.vault");
        self
    }

    pub fn secret_path(&self, username: &str) -> String {
        format!("{}/{}", self.mount, username)
    }

    fn storage_failure(&self, op: &str, username: &str, err: RuntimeError) -> RuntimeError {
        self.logger
            .error(format!("{} '{}' against vault failed: {}", op, username, err));
        match err {
            RuntimeError::NotFound(_) | RuntimeError::Storage(_) => err,
            other => RuntimeError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
impl AuthN for VaultAuthN {
    async fn register(&self, username: &str, password: &str) -> Result<UserRecord> {
        validate_credentials(username, password)?;

        let record = UserRecord::new(username, self.hasher.hash(password)?);
        let mut data = JsonMap::new();
        data.insert(
            USER_FIELD.to_string(),
            JsonValue::String(serde_json::to_string(&record)?),
        );

        let path = self.secret_path(username);
        let conn = self.config.connect()?;
        conn.write(&path, &data)
            .await
            .map_err(|e| self.storage_failure("register", username, e))?;
        conn.close();

        Ok(record.redacted())
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserRecord> {
        validate_credentials(username, password)?;

        let path = self.secret_path(username);
        let conn = self.config.connect()?;
        let data = conn
            .read(&path)
            .await
            .map_err(|e| self.storage_failure("login", username, e))?
            .ok_or_else(|| RuntimeError::NotFound(format!("user '{}'", username)))?;
        conn.close();

        let encoded = data
            .get(USER_FIELD)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                RuntimeError::Storage(format!("secret '{}' has no '{}' field", path, USER_FIELD))
            })?;
        let record: UserRecord = serde_json::from_str(encoded)
            .map_err(|e| RuntimeError::Storage(format!("Failed to decode '{}': {}", path, e)))?;

        if !self.hasher.verify(password, &record.password_hash, &self.logger) {
            return Err(RuntimeError::InvalidCredentials);
        }
        Ok(record.redacted())
    }

    async fn logout(&self, username: &str) -> Result<()> {
        validate_username(username)
    }

    async fn delete(&self, username: &str) -> Result<()> {
        validate_username(username)?;

        let conn = self.config.connect()?;
        let existed = conn
            .delete(&self.secret_path(username))
            .await
            .map_err(|e| self.storage_failure("delete", username, e))?;
        conn.close();

        if !existed {
            return Err(RuntimeError::NotFound(format!("user '{}'", username)));
        }
        Ok(())
    }
}
