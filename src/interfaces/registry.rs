use crate::core::Result;
use async_trait::async_trait;

/// Discovery service announcement.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Announces this process instance.
    async fn register(&self) -> Result<()>;

    /// Port advertised in the announcement.
    fn set_port(&mut self, port: u16) -> Result<()>;
}
