use crate::core::{Result, RuntimeError};
use crate::interfaces::Configuration;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration read from `<name>.json`.
///
/// Search order (first hit wins): `/etc/<name>/`, `$HOME/.<name>/`, paths
/// added with [`JsonConfiguration::add_path`], paths given to `open`, then
/// the working directory. `SECTION_KEY` style environment variables override
/// `section.key` entries unless disabled.
#[derive(Debug, Clone)]
pub struct JsonConfiguration {
    name: String,
    paths: Vec<PathBuf>,
    values: JsonValue,
    source: Option<PathBuf>,
    loaded: bool,
    env_overrides: bool,
    system_paths: bool,
}

impl JsonConfiguration {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(RuntimeError::InvalidInput("name cannot be empty".into()));
        }
        Ok(Self {
            name: name.to_string(),
            paths: Vec::new(),
            values: JsonValue::Object(Default::default()),
            source: None,
            loaded: false,
            env_overrides: true,
            system_paths: true,
        })
    }

    /// Already-loaded configuration; `open` becomes a no-op.
    pub fn from_value(values: JsonValue) -> Self {
        Self {
            name: String::new(),
            paths: Vec::new(),
            values,
            source: None,
            loaded: true,
            env_overrides: false,
            system_paths: false,
        }
    }

    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    /// Skips `/etc/<name>/` and `$HOME/.<name>/`.
    pub fn local_only(mut self) -> Self {
        self.system_paths = false;
        self
    }

    /// File the configuration was read from, once opened.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn search_paths(&self, extra: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.system_paths {
            paths.push(PathBuf::from(format!("/etc/{}/", self.name)));
            if let Some(home) = std::env::var_os("HOME") {
                paths.push(PathBuf::from(home).join(format!(".{}", self.name)));
            }
        }
        paths.extend(self.paths.iter().cloned());
        paths.extend(extra.iter().cloned());
        paths.push(PathBuf::from("."));
        paths
    }

    fn lookup(&self, key: &str) -> Option<JsonValue> {
        if self.env_overrides {
            let var = key.to_uppercase().replace(['.', '-'], "_");
            if let Ok(value) = std::env::var(var) {
                return Some(JsonValue::String(value));
            }
        }
        let mut current = &self.values;
        for segment in key.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }
}

/// Parses `250`, `"250ms"`, `"5s"`, `"2m"`, `"1h"`, `"1d"`.
/// Unit-less values are milliseconds.
pub fn parse_duration(value: &JsonValue) -> Option<Duration> {
    match value {
        JsonValue::Number(n) => n.as_u64().map(Duration::from_millis),
        JsonValue::String(s) => {
            let s = s.trim();
            let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
            let (digits, unit) = s.split_at(split);
            let amount: u64 = digits.parse().ok()?;
            let millis = match unit.trim() {
                "" | "ms" => amount,
                "s" => amount.checked_mul(1_000)?,
                "m" => amount.checked_mul(60_000)?,
                "h" => amount.checked_mul(3_600_000)?,
                "d" => amount.checked_mul(86_400_000)?,
                _ => return None,
            };
            Some(Duration::from_millis(millis))
        }
        _ => None,
    }
}

impl Configuration for JsonConfiguration {
    fn open(&mut self, paths: &[PathBuf]) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let file_name = format!("{}.json", self.name);
        let searched = self.search_paths(paths);
        let found = searched
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                RuntimeError::Configuration(format!(
                    "{} not found in {:?}",
                    file_name, searched
                ))
            })?;

        let data = std::fs::read(&found).map_err(|e| {
            RuntimeError::Configuration(format!("Failed to read {}: {}", found.display(), e))
        })?;
        self.values = serde_json::from_slice(&data).map_err(|e| {
            RuntimeError::Configuration(format!("Failed to parse {}: {}", found.display(), e))
        })?;
        self.source = Some(found);
        self.loaded = true;
        Ok(())
    }

    fn get(&self, key: &str) -> Option<JsonValue> {
        self.lookup(key)
    }

    fn get_string_or_default(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            Some(JsonValue::String(s)) => s,
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(JsonValue::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    fn get_int_or_default(&self, key: &str, default: i64) -> i64 {
        match self.lookup(key) {
            Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            Some(JsonValue::Bool(b)) => b,
            Some(JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_float_or_default(&self, key: &str, default: f64) -> f64 {
        match self.lookup(key) {
            Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_duration_or_default(&self, key: &str, default: Duration) -> Duration {
        self.lookup(key)
            .as_ref()
            .and_then(parse_duration)
            .unwrap_or(default)
    }

    fn get_strings_or_default(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.lookup(key) {
            Some(JsonValue::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(JsonValue::String(s)) => s
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> JsonConfiguration {
        JsonConfiguration::from_value(json!({
            "log": { "level": "debug" },
            "transport": { "port": 9090, "tls": false, "timeout": "5s" },
            "broker": { "topics": ["a", "b"] },
            "ratio": 0.25
        }))
    }

    #[test]
    fn typed_lookups_fall_back_on_missing_or_mistyped() {
        let config = sample();
        assert_eq!(config.get_string_or_default("log.level", "info"), "debug");
        assert_eq!(config.get_string_or_default("log.format", "text"), "text");
        assert_eq!(config.get_int_or_default("transport.port", 8080), 9090);
        assert_eq!(config.get_int_or_default("log.level", 7), 7);
        assert!(!config.get_bool_or_default("transport.tls", true));
        assert!(config.get_bool_or_default("transport.missing", true));
        assert_eq!(config.get_float_or_default("ratio", 1.0), 0.25);
        assert_eq!(
            config.get_duration_or_default("transport.timeout", Duration::ZERO),
            Duration::from_secs(5)
        );
        assert_eq!(config.get_strings_or_default("broker.topics", &[]), vec!["a", "b"]);
        assert_eq!(config.get_strings_or_default("broker.none", &["x"]), vec!["x"]);
        assert!(config.get("transport").unwrap().is_object());
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration(&json!(250)), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(&json!("250ms")), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(&json!("2m")), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration(&json!("1d")), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration(&json!("soon")), None);
        assert_eq!(parse_duration(&json!("5y")), None);
    }

    #[test]
    fn open_reads_first_matching_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("capstan-config-test.json"),
            r#"{"endpoint": {"request": "ping"}}"#,
        )
        .unwrap();

        let mut config = JsonConfiguration::new("capstan-config-test")
            .unwrap()
            .with_env_overrides(false);
        config.open(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(config.get_string_or_default("endpoint.request", "x"), "ping");
        assert_eq!(
            config.source().unwrap(),
            dir.path().join("capstan-config-test.json")
        );
    }

    #[test]
    fn open_without_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = JsonConfiguration::new("capstan-absent-config").unwrap();
        let err = config.open(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let config = JsonConfiguration::from_value(json!({"capstan_test": {"retries": 1}}))
            .with_env_overrides(true);
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("CAPSTAN_TEST_RETRIES", "4") };
        assert_eq!(config.get_int_or_default("capstan_test.retries", 0), 4);
        unsafe { std::env::remove_var("CAPSTAN_TEST_RETRIES") };
        assert_eq!(config.get_int_or_default("capstan_test.retries", 0), 1);
    }

    #[test]
    fn empty_name_rejected() {
        assert!(JsonConfiguration::new("").is_err());
    }
}
