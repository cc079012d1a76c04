use super::{PasswordHasher, UserRecord, validate_credentials, validate_username};
use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::AuthN;
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_FOLDER: &str = "fs";

/// AuthN backend keeping one JSON document per user in a folder.
///
/// Layout: `<folder>/<username>.json`. No locking: concurrent writes of one
/// username resolve as last writer wins.
#[derive(Debug, Clone)]
pub struct LocalFileAuthN {
    folder: PathBuf,
    hasher: PasswordHasher,
    logger: Logger,
}

impl LocalFileAuthN {
    pub fn new() -> Self {
        Self {
            folder: PathBuf::from(DEFAULT_FOLDER),
            hasher: PasswordHasher::default(),
            logger: Logger::detached(),
        }
    }

    pub fn with_folder(mut self, folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        if folder.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidInput("folder cannot be empty".into()));
        }
        self.folder = folder;
        Ok(self)
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("authn.fs");
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Location of a user's record.
    pub fn record_path(&self, username: &str) -> PathBuf {
        self.folder.join(format!("{}.json", username))
    }

    async fn write_record(&self, record: &UserRecord) -> Result<()> {
        let serialized = serde_json::to_vec(record)?;
        let folder = self.folder.clone();
        let target = self.record_path(&record.username);

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&folder).map_err(|e| {
                RuntimeError::Storage(format!("Failed to create folder {}: {}", folder.display(), e))
            })?;
            let mut temp = NamedTempFile::new_in(&folder)
                .map_err(|e| RuntimeError::Storage(format!("Failed to create temp file: {}", e)))?;
            temp.write_all(&serialized)
                .map_err(|e| RuntimeError::Storage(format!("Failed to write record: {}", e)))?;
            temp.as_file()
                .sync_all()
                .map_err(|e| RuntimeError::Storage(format!("Failed to sync record: {}", e)))?;
            temp.persist(&target)
                .map_err(|e| RuntimeError::Storage(format!("Failed to rename record: {}", e.error)))?;
            Ok(())
        })
        .await
        .map_err(|e| RuntimeError::Storage(format!("record writer panicked: {}", e)))?
    }

    async fn read_record(&self, username: &str) -> Result<UserRecord> {
        let path = self.record_path(username);
        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => RuntimeError::NotFound(format!("user '{}'", username)),
            _ => RuntimeError::Storage(format!("Failed to read {}: {}", path.display(), e)),
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            RuntimeError::Storage(format!("Failed to decode {}: {}", path.display(), e))
        })
    }
}

impl Default for LocalFileAuthN {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthN for LocalFileAuthN {
    async fn register(&self, username: &str, password: &str) -> Result<UserRecord> {
        validate_credentials(username, password)?;

        let record = UserRecord::new(username, self.hasher.hash(password)?);
        self.write_record(&record).await.inspect_err(|err| {
            self.logger.error(format!("register '{}' failed: {}", username, err));
        })?;

        self.logger.debug(format!("registered user '{}'", username));
        Ok(record.redacted())
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserRecord> {
        validate_credentials(username, password)?;

        let record = self.read_record(username).await.inspect_err(|err| {
            self.logger.warn(format!("login '{}' failed: {}", username, err));
        })?;

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

        let path = self.record_path(username);
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => RuntimeError::NotFound(format!("user '{}'", username)),
            _ => {
                let err = RuntimeError::Storage(format!("Failed to delete {}: {}", path.display(), e));
                self.logger.error(&err);
                err
            }
        })?;

        self.logger.debug(format!("deleted user '{}'", username));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> LocalFileAuthN {
        LocalFileAuthN::new()
            .with_folder(dir.path())
            .unwrap()
            .with_hasher(PasswordHasher::new(PasswordHasher::MIN_COST).unwrap())
    }

    #[tokio::test]
    async fn test_register_writes_hashed_record() {
        let dir = TempDir::new().unwrap();
        let authn = backend(&dir);

        let record = authn.register("alice", "secret").await.unwrap();
        assert!(!record.has_password_hash());

        let stored: UserRecord =
            serde_json::from_slice(&std::fs::read(dir.path().join("alice.json")).unwrap()).unwrap();
        assert_eq!(stored.username, "alice");
        assert_ne!(stored.password_hash, "secret");
        assert!(stored.password_hash.starts_with("$2"));
        assert_eq!(stored.created_at, record.created_at);
    }

    #[tokio::test]
    async fn test_register_creates_missing_folder() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("users").join("v1");
        let authn = backend(&dir).with_folder(&nested).unwrap();

        authn.register("bob", "pw").await.unwrap();
        assert!(nested.join("bob.json").exists());
    }

    #[tokio::test]
    async fn test_login_unknown_user_is_not_found() {
        let dir = TempDir::new().unwrap();
        let authn = backend(&dir);
        let err = authn.login("ghost", "pw").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_storage_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("carol.json"), b"{not json").unwrap();
        let authn = backend(&dir);
        let err = authn.login("carol", "pw").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Storage(_)));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let authn = backend(&dir);
        let err = authn.register("../escape", "pw").await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_)));
        assert!(!dir.path().parent().unwrap().join("escape.json").exists());
    }

    #[tokio::test]
    async fn test_logout_validates_username() {
        let dir = TempDir::new().unwrap();
        let authn = backend(&dir);
        assert!(authn.logout("alice").await.is_ok());
        assert!(matches!(authn.logout("").await, Err(RuntimeError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_folder_rejected() {
        assert!(LocalFileAuthN::new().with_folder("").is_err());
        assert_eq!(LocalFileAuthN::new().folder(), Path::new(DEFAULT_FOLDER));
    }
}
