//! Injected logging capability
//!
//! The plugin manager and orchestrator log through an `Arc<dyn Logger>`
//! handed to them at construction. Hosts (and tests) swap it with
//! `set_logger` and restore [`TracingLogger`] with `reset_logger`.

use std::sync::Arc;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Logging sink
pub trait Logger: Send + Sync {
    /// Record a message. `scope` names the emitting component or plugin.
    fn log(&self, level: LogLevel, scope: &str, message: &str);

    fn debug(&self, scope: &str, message: &str) {
        self.log(LogLevel::Debug, scope, message);
    }

    fn info(&self, scope: &str, message: &str) {
        self.log(LogLevel::Info, scope, message);
    }

    fn warn(&self, scope: &str, message: &str) {
        self.log(LogLevel::Warn, scope, message);
    }

    fn error(&self, scope: &str, message: &str) {
        self.log(LogLevel::Error, scope, message);
    }
}

/// Default logger, forwarding to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, scope: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(scope, "{}", message),
            LogLevel::Info => tracing::info!(scope, "{}", message),
            LogLevel::Warn => tracing::warn!(scope, "{}", message),
            LogLevel::Error => tracing::error!(scope, "{}", message),
        }
    }
}

/// The logger used when none is injected
pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}
