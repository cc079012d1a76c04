use crate::authn::UserRecord;
use crate::core::Result;
use async_trait::async_trait;

/// Credential store contract shared by every AuthN backend.
///
/// Returned records never carry the password hash.
#[async_trait]
pub trait AuthN: Send + Sync {
    async fn register(&self, username: &str, password: &str) -> Result<UserRecord>;

    async fn login(&self, username: &str, password: &str) -> Result<UserRecord>;

    async fn logout(&self, username: &str) -> Result<()>;

    async fn delete(&self, username: &str) -> Result<()>;

    /// Full overwrite: same as registering the username again.
    async fn reset(&self, username: &str, password: &str) -> Result<UserRecord> {
        self.register(username, password).await
    }
}
