//! Free-port discovery for the HTTP transport.
//!
//! This is a liveness probe, not a reservation: another process may bind the
//! chosen port between the probe and the transport's own bind.

use crate::core::{Logger, Result, RuntimeError};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

pub const DEFAULT_PROBE_HOST: &str = "localhost";
/// Exclusive upper bound of the search.
pub const DEFAULT_PORT_CEILING: u16 = 32000;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BACKOFFS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Occupied,
    Free,
    DescriptorsExhausted,
}

/// Opens the connection used to probe a port.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &str) -> io::Result<()>;
}

struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, target: &str) -> io::Result<()> {
        TcpStream::connect(target).await.map(drop)
    }
}

#[derive(Clone)]
pub struct PortNegotiator {
    host: String,
    ceiling: u16,
    timeout: Duration,
    max_backoffs: u32,
    dialer: Arc<dyn Dialer>,
    logger: Logger,
}

impl fmt::Debug for PortNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortNegotiator")
            .field("host", &self.host)
            .field("ceiling", &self.ceiling)
            .field("timeout", &self.timeout)
            .field("max_backoffs", &self.max_backoffs)
            .finish()
    }
}

impl PortNegotiator {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_PROBE_HOST.to_string(),
            ceiling: DEFAULT_PORT_CEILING,
            timeout: DEFAULT_PROBE_TIMEOUT,
            max_backoffs: DEFAULT_MAX_BACKOFFS,
            dialer: Arc::new(TcpDialer),
            logger: Logger::detached(),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn ceiling(mut self, ceiling: u16) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_backoffs(mut self, max_backoffs: u32) -> Self {
        self.max_backoffs = max_backoffs;
        self
    }

    /// Replaces the TCP connect used for probing.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.clone();
        self
    }

    /// Returns the first port in `start..ceiling` with no listener.
    pub async fn negotiate(&self, start: u16) -> Result<u16> {
        for port in start..self.ceiling {
            if self.is_free(port).await? {
                if port != start {
                    self.logger
                        .info(format!("port {} is busy, using {} instead", start, port));
                }
                return Ok(port);
            }
            self.logger.debug(format!("port {} open", port));
        }
        Err(RuntimeError::NoPortAvailable {
            start,
            ceiling: self.ceiling,
        })
    }

    async fn is_free(&self, port: u16) -> Result<bool> {
        let mut backoffs = 0;
        loop {
            match self.probe(port).await {
                Probe::Occupied => return Ok(false),
                Probe::Free => return Ok(true),
                Probe::DescriptorsExhausted if backoffs < self.max_backoffs => {
                    backoffs += 1;
                    self.logger.warn(format!(
                        "out of file descriptors probing port {}, retrying ({}/{})",
                        port, backoffs, self.max_backoffs
                    ));
                    sleep(self.timeout).await;
                }
                Probe::DescriptorsExhausted => {
                    return Err(RuntimeError::Io(format!(
                        "file descriptors exhausted while probing port {}",
                        port
                    )));
                }
            }
        }
    }

    async fn probe(&self, port: u16) -> Probe {
        let target = format!("{}:{}", self.host, port);
        match timeout(self.timeout, self.dialer.dial(&target)).await {
            Ok(Ok(())) => Probe::Occupied,
            Ok(Err(err)) if is_descriptor_exhaustion(&err) => Probe::DescriptorsExhausted,
            // Refused, unreachable and timed-out probes all mean nobody answers.
            Ok(Err(_)) | Err(_) => Probe::Free,
        }
    }
}

impl Default for PortNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

// EMFILE / ENFILE
fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(23) | Some(24))
        || err.to_string().contains("too many open files")
}
