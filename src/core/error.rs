use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("wrong username or password")]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No free port available in range {start}..{ceiling}")]
    NoPortAvailable { start: u16, ceiling: u16 },

    #[error("Fatal startup failure in {capability}: {source}")]
    FatalStartup {
        capability: &'static str,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("Capability '{0}' is not installed")]
    MissingCapability(&'static str),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Teardown failed: {}", .0.join("; "))]
    Teardown(Vec<String>),
}

impl RuntimeError {
    pub(crate) fn fatal(capability: &'static str, source: RuntimeError) -> Self {
        Self::FatalStartup {
            capability,
            source: Box::new(source),
        }
    }

    /// Message safe to hand back to a remote caller.
    ///
    /// Storage and infrastructure detail stays server-side; only input
    /// validation messages are passed through verbatim. An unknown user reads
    /// the same as a wrong password so callers cannot discover usernames.
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidInput(message) => message.clone(),
            Self::InvalidCredentials | Self::NotFound(_) => {
                Self::InvalidCredentials.to_string()
            }
            _ => "internal error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for RuntimeError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::Storage(format!("password hashing failed: {}", err))
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Every failure detected while assembling a runtime.
///
/// The first entry is the one that aborted the build.
#[derive(Debug)]
pub struct BuildError {
    errors: Vec<RuntimeError>,
}

impl BuildError {
    pub(crate) fn new(errors: Vec<RuntimeError>) -> Self {
        Self { errors }
    }

    pub fn first(&self) -> Option<&RuntimeError> {
        self.errors.first()
    }

    pub fn errors(&self) -> &[RuntimeError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<RuntimeError> {
        self.errors
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime build failed")?;
        for (idx, err) in self.errors.iter().enumerate() {
            write!(f, "{}{}", if idx == 0 { ": " } else { "; " }, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}
