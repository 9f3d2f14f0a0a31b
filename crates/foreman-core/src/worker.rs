use async_trait::async_trait;

use crate::error::ProcessError;

/// A long-running background job supervised by a [`Manager`](crate::Manager).
///
/// Design intent:
/// - `start` runs the whole job and only returns once it is finished, either
///   because the work is done or because `stop` was called.
/// - `stop` only issues the signal. Waiting for `start` to return is the
///   manager's job (`await_all`).
#[async_trait]
pub trait Worker: Send + Sync {
    /// Diagnostic name used in log fields.
    fn name(&self) -> &str {
        "worker"
    }

    /// Run the worker on the calling task until it finishes.
    ///
    /// Returns `Ok(())` on a clean stop.
    async fn start(&self) -> Result<(), ProcessError>;

    /// Ask the running instance to finish.
    ///
    /// Must make the matching `start` return in bounded time.
    async fn stop(&self) -> Result<(), ProcessError>;
}
