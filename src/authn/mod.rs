//! Credential subsystem.
//!
//! Both backends share [`UserRecord`], the bcrypt [`PasswordHasher`] and the
//! input validation below; they only differ in where the serialized record
//! lives.

pub mod fs;
pub mod vault;

pub use fs::LocalFileAuthN;
pub use vault::VaultAuthN;

use crate::core::{Logger, Result, RuntimeError};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "user";

/// Persisted identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// bcrypt hash; empty (and omitted from JSON) on records handed to callers.
    #[serde(rename = "password", default, skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
    /// Creation time in Unix nanoseconds.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    pub groups: Vec<String>,
    /// Reserved: stored but never enforced.
    pub enabled: bool,
}

impl UserRecord {
    /// Builds a fresh record: default group, enabled, created now.
    pub fn new(username: &str, password_hash: String) -> Self {
        Self {
            username: username.to_string(),
            password_hash,
            created_at: now_nanos(),
            groups: vec![DEFAULT_GROUP.to_string()],
            enabled: true,
        }
    }

    /// Returns the record with the password hash stripped.
    pub fn redacted(mut self) -> Self {
        self.password_hash.clear();
        self
    }

    pub fn has_password_hash(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

fn now_nanos() -> i64 {
    let now = Utc::now();
    // Out of range only after the year 2262; fall back to microsecond resolution.
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Salted one-way hashing with a tunable bcrypt cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Lowest cost bcrypt accepts. Only sensible for tests.
    pub const MIN_COST: u32 = 4;
    pub const MAX_COST: u32 = 31;

    pub fn new(cost: u32) -> Result<Self> {
        if !(Self::MIN_COST..=Self::MAX_COST).contains(&cost) {
            return Err(RuntimeError::InvalidInput(format!(
                "bcrypt cost must be between {} and {}",
                Self::MIN_COST,
                Self::MAX_COST
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hashes a password. The hash embeds its salt and cost.
    pub fn hash(&self, password: &str) -> Result<String> {
        Ok(bcrypt::hash(password, self.cost)?)
    }

    /// Verifies a supplied password against a stored hash.
    ///
    /// A stored hash that bcrypt cannot parse never verifies.
    pub fn verify(&self, password: &str, stored_hash: &str, logger: &Logger) -> bool {
        match bcrypt::verify(password, stored_hash) {
            Ok(matches) => matches,
            Err(err) => {
                logger.warn(format!("stored password hash is unreadable: {}", err));
                false
            }
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Validates that a username is non-empty and safe to use as a storage key.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(RuntimeError::InvalidInput("username cannot be empty".into()));
    }
    if username == "."
        || username.contains("..")
        || username.contains('/')
        || username.contains('\\')
        || username.chars().any(char::is_control)
    {
        return Err(RuntimeError::InvalidInput(format!(
            "username '{}' contains forbidden characters",
            username.escape_debug()
        )));
    }
    Ok(())
}

pub fn validate_credentials(username: &str, password: &str) -> Result<()> {
    if username.is_empty() || password.is_empty() {
        return Err(RuntimeError::InvalidInput(
            "username and password cannot be empty".into(),
        ));
    }
    validate_username(username)
}
