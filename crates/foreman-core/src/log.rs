//! Logger facade.
//!
//! The manager and the workers only ever report through [`Logger`]; nothing
//! they do depends on what the sink does with the messages. The default sink
//! is [`NoopLogger`]. [`TracingLogger`] forwards to `tracing`.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Structured fields attached to a log entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LogFields(BTreeMap<String, Value>);

impl LogFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Shorthand for the `worker` field every worker attaches.
    pub fn worker(name: &str) -> Self {
        Self::new().with("worker", name)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LogFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

/// A pluggable sink for leveled messages.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str, fields: &LogFields);

    fn error(&self, message: &str, err: &(dyn StdError + 'static), fields: &LogFields);
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _message: &str, _fields: &LogFields) {}

    fn error(&self, _message: &str, _err: &(dyn StdError + 'static), _fields: &LogFields) {}
}

/// Forwards every entry to the `tracing` macros, with the fields rendered as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, fields: &LogFields) {
        if fields.is_empty() {
            tracing::info!("{message}");
        } else {
            tracing::info!(fields = %fields, "{message}");
        }
    }

    fn error(&self, message: &str, err: &(dyn StdError + 'static), fields: &LogFields) {
        if fields.is_empty() {
            tracing::error!(error = %err, "{message}");
        } else {
            tracing::error!(error = %err, fields = %fields, "{message}");
        }
    }
}

pub(crate) fn noop() -> Arc<dyn Logger> {
    Arc::new(NoopLogger)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_render_as_json() {
        let fields = LogFields::worker("mailer").with("attempt", 3);
        assert_eq!(fields.to_string(), r#"{"attempt":3,"worker":"mailer"}"#);
        assert_eq!(fields.get("worker"), Some(&Value::from("mailer")));
    }

    #[test]
    fn empty_fields_render_as_empty_object() {
        assert_eq!(LogFields::new().to_string(), "{}");
    }

    #[test]
    fn loggers_accept_entries() {
        let err = std::io::Error::other("nope");
        for logger in [noop(), Arc::new(TracingLogger) as Arc<dyn Logger>] {
            logger.info("hello", &LogFields::worker("w"));
            logger.error("failed", &err, &LogFields::new());
        }
    }
}
