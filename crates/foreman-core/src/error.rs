use std::any::Any;
use std::error::Error as StdError;

use thiserror::Error;

/// Errors raised by workers and the manager.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("worker {name} is already running")]
    AlreadyRunning { name: String },

    #[error("worker {name} isn't running")]
    NotRunning { name: String },

    #[error("manager is already running")]
    ManagerAlreadyRunning,

    #[error("server is already running")]
    ServerAlreadyRunning,

    #[error("server isn't running")]
    ServerNotRunning,

    /// Returned by a callback that observed its cancellation token.
    /// Workers treat it as a clean shutdown.
    #[error("operation was canceled")]
    Canceled,

    /// A panic with a string payload, converted at the worker boundary.
    #[error("{0}")]
    Panicked(String),

    /// A panic whose payload carried nothing we could render.
    #[error("unknown error")]
    UnknownPanic,

    #[error("{0}")]
    Failed(#[source] Box<dyn StdError + Send + Sync>),

    #[error("{0}")]
    Other(String),
}

impl ProcessError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn failed(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Failed(err.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Turn a recovered panic payload into an ordinary error.
    ///
    /// - `&'static str` / `String` -> [`ProcessError::Panicked`] with the same message
    /// - `ProcessError` -> passed through as-is
    /// - `Box<dyn Error + Send + Sync>` -> [`ProcessError::Failed`]
    /// - anything else -> [`ProcessError::UnknownPanic`]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<&'static str>() {
            Ok(message) => return Self::Panicked((*message).to_string()),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::Panicked(*message),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<ProcessError>() {
            Ok(err) => return *err,
            Err(payload) => payload,
        };
        match payload.downcast::<Box<dyn StdError + Send + Sync>>() {
            Ok(err) => Self::Failed(*err),
            Err(_) => Self::UnknownPanic,
        }
    }
}
