use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::Registry;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_AGENT_ADDRESS: &str = "localhost:8500";
pub const DEFAULT_SERVICE_ADDRESS: &str = "localhost";
pub const REGISTER_PATH: &str = "/v1/agent/service/register";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceCheck {
    #[serde(rename = "HTTP")]
    http: String,
    interval: String,
    timeout: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRegistration {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    address: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<ServiceCheck>,
}

/// Registry backend announcing the service to a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    id: String,
    name: String,
    address: String,
    service_address: String,
    port: u16,
    credentials: Option<(String, String)>,
    interval: String,
    timeout: String,
    health_endpoint: Option<String>,
    request_timeout: Duration,
    logger: Logger,
}

fn non_empty(value: &str, what: &str) -> Result<String> {
    if value.is_empty() {
        return Err(RuntimeError::InvalidInput(format!("{} cannot be empty", what)));
    }
    Ok(value.to_string())
}

impl ConsulRegistry {
    pub fn new() -> Self {
        Self {
            id: "default".to_string(),
            name: "default".to_string(),
            address: DEFAULT_AGENT_ADDRESS.to_string(),
            service_address: DEFAULT_SERVICE_ADDRESS.to_string(),
            port: 8080,
            credentials: None,
            interval: "3s".to_string(),
            timeout: "5s".to_string(),
            health_endpoint: None,
            request_timeout: Duration::from_secs(10),
            logger: Logger::detached(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Result<Self> {
        self.id = non_empty(id, "ID")?;
        Ok(self)
    }

    pub fn with_name(mut self, name: &str) -> Result<Self> {
        self.name = non_empty(name, "name")?;
        Ok(self)
    }

    /// Agent address, `host:port`.
    pub fn with_address(mut self, address: &str) -> Result<Self> {
        self.address = non_empty(address, "address")?;
        Ok(self)
    }

    /// Address advertised for this service instance.
    pub fn with_service_address(mut self, address: &str) -> Result<Self> {
        self.service_address = non_empty(address, "service address")?;
        Ok(self)
    }

    pub fn with_port(mut self, port: u16) -> Result<Self> {
        self.set_port(port)?;
        Ok(self)
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Result<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(RuntimeError::InvalidInput(
                "username/password cannot be empty".into(),
            ));
        }
        self.credentials = Some((username.to_string(), password.to_string()));
        Ok(self)
    }

    pub fn with_interval(mut self, interval: &str) -> Result<Self> {
        self.interval = non_empty(interval, "interval")?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: &str) -> Result<Self> {
        self.timeout = non_empty(timeout, "timeout")?;
        Ok(self)
    }

    pub fn with_health_endpoint(mut self, endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim_start_matches('/');
        self.health_endpoint = Some(non_empty(endpoint, "endpoint")?);
        Ok(self)
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("registry.consul");
        self
    }

    fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.service_address.clone(),
            port: self.port,
            check: self.health_endpoint.as_ref().map(|endpoint| ServiceCheck {
                http: format!(
                    "http://{}:{}/{}",
                    self.service_address, self.port, endpoint
                ),
                interval: self.interval.clone(),
                timeout: self.timeout.clone(),
            }),
        }
    }

    fn register_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            format!("{}{}", self.address.trim_end_matches('/'), REGISTER_PATH)
        } else {
            format!("http://{}{}", self.address, REGISTER_PATH)
        }
    }
}

impl Default for ConsulRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn register(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| RuntimeError::Registry(e.to_string()))?;

        let mut request = client.put(self.register_url()).json(&self.registration());
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RuntimeError::Registry(format!("agent {} unreachable: {}", self.address, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Registry(format!(
                "agent rejected registration ({}): {}",
                status,
                body.trim()
            )));
        }

        self.logger.info(format!(
            "registered service '{}' ({}) at {}:{}",
            self.name, self.id, self.service_address, self.port
        ));
        Ok(())
    }

    fn set_port(&mut self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(RuntimeError::InvalidInput("port cannot be zero".into()));
        }
        self.port = port;
        Ok(())
    }
}
