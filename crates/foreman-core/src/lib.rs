//! foreman-core
//!
//! Supervision of long-running background workers.
//!
//! - **worker**: the [`Worker`] capability (`start` blocks until done, `stop` signals)
//! - **manager**: [`Manager`], which starts, stops and awaits a group of workers
//!   that live and die together
//! - **callback**: [`CallbackWorker`], one fallible async callback with
//!   cancellation, retry-with-backoff and panic recovery
//! - **server**: [`ServerWorker`], an adapter over an externally owned server
//! - **log**: the injectable [`Logger`] facade (no-op by default)
//! - **error**: [`ProcessError`]

pub mod callback;
pub mod error;
pub mod log;
pub mod manager;
pub mod server;
pub mod worker;

mod wait_group;

pub use callback::{
    CallbackConfig, CallbackFuture, CallbackOption, CallbackWorker, RetryOnErrorOpt,
};
pub use error::ProcessError;
pub use log::{LogFields, Logger, NoopLogger, TracingLogger};
pub use manager::{Manager, ManagerBuilder};
pub use server::{Server, ServerError, ServerWorker};
pub use worker::Worker;

pub use tokio_util::sync::CancellationToken;
