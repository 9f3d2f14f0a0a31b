//! Callback worker configuration: retry-on-error options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry the callback after it fails.
///
/// `max_attempts` counts failures across the whole `start()` call. `0` means
/// retry forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOnErrorOpt {
    /// Delay between a failure and the next attempt.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    #[serde(default)]
    pub max_attempts: u32,
}

impl RetryOnErrorOpt {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts,
        }
    }

    /// Whether `failures` uses up the attempt budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// The options recognized by [`CallbackWorker`](super::CallbackWorker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallbackOption {
    RetryOnError(RetryOnErrorOpt),
}

impl From<RetryOnErrorOpt> for CallbackOption {
    fn from(opt: RetryOnErrorOpt) -> Self {
        Self::RetryOnError(opt)
    }
}

/// Resolved configuration of a callback worker.
///
/// Default: no retry, the first error ends `start()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackConfig {
    #[serde(default)]
    pub retry: Option<RetryOnErrorOpt>,
}

impl CallbackConfig {
    pub fn from_options(options: impl IntoIterator<Item = CallbackOption>) -> Self {
        let mut config = Self::default();
        for option in options {
            config.apply(option);
        }
        config
    }

    pub fn apply(&mut self, option: CallbackOption) {
        match option {
            CallbackOption::RetryOnError(opt) => self.retry = Some(opt),
        }
    }

    pub fn retry_on_error(&self) -> bool {
        self.retry.is_some()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
