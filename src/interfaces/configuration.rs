use crate::core::Result;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::time::Duration;

/// Read-only typed configuration lookups with fallbacks.
///
/// Keys are dotted paths (`log.level`). Every `*_or_default` getter returns
/// the default when the key is absent or holds a value of another type.
pub trait Configuration: Send + Sync {
    /// Loads the configuration, searching `paths` in addition to the
    /// backend's own locations.
    fn open(&mut self, paths: &[PathBuf]) -> Result<()>;

    fn get(&self, key: &str) -> Option<JsonValue>;

    fn get_string_or_default(&self, key: &str, default: &str) -> String;

    fn get_int_or_default(&self, key: &str, default: i64) -> i64;

    fn get_bool_or_default(&self, key: &str, default: bool) -> bool;

    fn get_float_or_default(&self, key: &str, default: f64) -> f64;

    fn get_duration_or_default(&self, key: &str, default: Duration) -> Duration;

    fn get_strings_or_default(&self, key: &str, default: &[&str]) -> Vec<String>;
}
