//! Logging handle injected into every component.
//!
//! A `Logger` wraps the runtime's service span plus the level filter read
//! from configuration. Backends receive a clone at construction time and
//! derive their own child span, so log lines carry the service identity
//! without any process-wide logger state.

use std::fmt::Display;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Span, event, info_span};

#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
    level: LevelFilter,
}

impl Logger {
    pub fn new(service_id: &str, service_name: &str) -> Self {
        Self {
            span: info_span!("service", id = %service_id, name = %service_name),
            level: LevelFilter::INFO,
        }
    }

    /// Logger with no service identity, used by backends built standalone.
    pub fn detached() -> Self {
        Self {
            span: Span::none(),
            level: LevelFilter::INFO,
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Parses `debug|info|warn|error|trace|off`; anything else means info.
    pub fn with_level_name(self, name: &str) -> Self {
        let level = LevelFilter::from_str(name.trim()).unwrap_or(LevelFilter::INFO);
        self.with_level(level)
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Child logger scoped to a named component of the service.
    pub fn component(&self, component: &'static str) -> Logger {
        Self {
            span: info_span!(parent: &self.span, "component", component),
            level: self.level,
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn debug(&self, message: impl Display) {
        if self.enabled(Level::DEBUG) {
            self.span.in_scope(|| event!(Level::DEBUG, "{}", message));
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.enabled(Level::INFO) {
            self.span.in_scope(|| event!(Level::INFO, "{}", message));
        }
    }

    pub fn warn(&self, message: impl Display) {
        if self.enabled(Level::WARN) {
            self.span.in_scope(|| event!(Level::WARN, "{}", message));
        }
    }

    pub fn error(&self, message: impl Display) {
        if self.enabled(Level::ERROR) {
            self.span.in_scope(|| event!(Level::ERROR, "{}", message));
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::detached()
    }
}
