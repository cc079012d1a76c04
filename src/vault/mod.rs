//! Minimal client for a Vault-compatible secret service (HTTP API v1).
//!
//! A [`VaultConnection`] is opened per operation and dropped afterwards;
//! pooling is left to the service side.

use crate::core::{Result, RuntimeError};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::time::Duration;

pub const TOKEN_HEADER: &str = "X-Vault-Token";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub servers: Vec<String>,
    pub token: String,
    pub timeout: Duration,
    pub skip_tls_verification: bool,
}

impl VaultConfig {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            token: String::new(),
            timeout: DEFAULT_TIMEOUT,
            skip_tls_verification: true,
        }
    }

    pub fn token(mut self, token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(RuntimeError::InvalidInput("token cannot be empty".into()));
        }
        self.token = token.to_string();
        Ok(self)
    }

    pub fn servers<I, S>(mut self, servers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.servers.len();
        self.servers
            .extend(servers.into_iter().map(Into::<String>::into).filter(|s| !s.is_empty()));
        if self.servers.len() == before {
            return Err(RuntimeError::InvalidInput(
                "at least one server must be provided".into(),
            ));
        }
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn skip_tls_verification(mut self, skip: bool) -> Self {
        self.skip_tls_verification = skip;
        self
    }

    /// Opens a connection to the first configured server.
    pub fn connect(&self) -> Result<VaultConnection> {
        let server = self
            .servers
            .first()
            .ok_or_else(|| RuntimeError::Storage("no vault server configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.skip_tls_verification)
            .build()?;
        Ok(VaultConnection {
            base: server.trim_end_matches('/').to_string(),
            token: self.token.clone(),
            client,
        })
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: JsonMap<String, JsonValue>,
}

#[derive(Deserialize, Default)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: ListData,
}

pub struct VaultConnection {
    base: String,
    token: String,
    client: reqwest::Client,
}

impl VaultConnection {
    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(TOKEN_HEADER, &self.token)
    }

    async fn check(path: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RuntimeError::Storage(format!(
            "vault returned {} for '{}': {}",
            status,
            path,
            body.trim()
        )))
    }

    /// Reads the data of a secret; `None` when the path holds nothing.
    pub async fn read(&self, path: &str) -> Result<Option<JsonMap<String, JsonValue>>> {
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(path, response).await?;
        let secret: SecretResponse = response.json().await?;
        Ok(Some(secret.data))
    }

    pub async fn write(&self, path: &str, data: &JsonMap<String, JsonValue>) -> Result<()> {
        let response = self.request(Method::POST, path).json(data).send().await?;
        Self::check(path, response).await?;
        Ok(())
    }

    /// Deletes a secret; `false` when nothing was stored there.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let response = self.request(Method::DELETE, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(path, response).await?;
        Ok(true)
    }

    pub async fn list(&self, path: &str) -> Result<Vec<String>> {
        let response = self
            .request(Method::GET, path)
            .query(&[("list", "true")])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = Self::check(path, response).await?;
        let listing: ListResponse = response.json().await?;
        Ok(listing.data.keys)
    }

    /// Explicit release; the underlying client pool is dropped with it.
    pub fn close(self) {}
}
