//! Callback worker: a single fallible async callback run as a supervised,
//! cancellable worker with optional retry-with-backoff.
//!
//! # Lifecycle
//! - `start()` flips the running flag, arms a fresh cancellation token and
//!   invokes the callback until it succeeds, is canceled, or fails for good.
//! - A panic inside the callback is caught at this boundary and turned into a
//!   [`ProcessError`] (see [`ProcessError::from_panic`]).
//! - `stop()` triggers the token and clears the flag. The callback is expected
//!   to notice the token; nothing is forcibly aborted. A backoff sleep in
//!   progress is cut short by the token.

mod options;

pub use options::{CallbackConfig, CallbackOption, RetryOnErrorOpt};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt as _;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::log::{self, LogFields, Logger};
use crate::worker::Worker;

/// The boxed future a callback produces.
pub type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send>>;

type Callback = dyn Fn(CancellationToken) -> CallbackFuture + Send + Sync;

struct RunState {
    running: bool,
    /// Bumped on every `start()` so a finished run never clears a newer one.
    generation: u64,
    cancel: CancellationToken,
    /// Failures within the current `start()` call; never reset between retries.
    errors: u32,
}

pub struct CallbackWorker {
    name: String,
    callback: Box<Callback>,
    config: CallbackConfig,
    state: Mutex<RunState>,
    logger: Arc<dyn Logger>,
}

impl CallbackWorker {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProcessError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Box::new(move |token: CancellationToken| -> CallbackFuture {
                Box::pin(callback(token))
            }),
            config: CallbackConfig::default(),
            state: Mutex::new(RunState {
                running: false,
                generation: 0,
                cancel: CancellationToken::new(),
                errors: 0,
            }),
            logger: log::noop(),
        }
    }

    pub fn with_option(mut self, option: CallbackOption) -> Self {
        self.config.apply(option);
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = CallbackOption>) -> Self {
        for option in options {
            self.config.apply(option);
        }
        self
    }

    pub fn with_config(mut self, config: CallbackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &CallbackConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Failures observed by the current (or last) `start()` call.
    pub async fn error_count(&self) -> u32 {
        self.state.lock().await.errors
    }

    fn fields(&self) -> LogFields {
        LogFields::worker(&self.name)
    }

    async fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock().await;
        state.running && state.generation == generation
    }

    async fn finish(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.running = false;
        }
    }

    async fn record_failure(&self) -> u32 {
        let mut state = self.state.lock().await;
        state.errors = state.errors.saturating_add(1);
        state.errors
    }

    /// Run the callback once. Panics, whether raised while building the future
    /// or while polling it, come back as errors.
    async fn invoke(&self, cancel: CancellationToken) -> Result<(), ProcessError> {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(cancel))) {
            Ok(future) => future,
            Err(payload) => return Err(ProcessError::from_panic(payload)),
        };

        AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ProcessError::from_panic(payload)))
    }

    async fn run(&self, generation: u64, cancel: &CancellationToken) -> Result<(), ProcessError> {
        while self.is_current(generation).await {
            let err = match self.invoke(cancel.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_canceled() => return Ok(()),
                Err(err) => err,
            };

            let failures = self.record_failure().await;
            let Some(retry) = self.config.retry else {
                return Err(err);
            };
            if retry.is_exhausted(failures) {
                return Err(err);
            }

            self.logger.error(
                "retrying execution of callback during error",
                &err,
                &self.fields().with("attempt", failures),
            );

            tokio::select! {
                _ = tokio::time::sleep(retry.timeout) => {}
                _ = cancel.cancelled() => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Worker for CallbackWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), ProcessError> {
        let (generation, cancel) = {
            let mut state = self.state.lock().await;
            if state.running {
                return Err(ProcessError::AlreadyRunning {
                    name: self.name.clone(),
                });
            }
            state.running = true;
            state.generation += 1;
            state.cancel = CancellationToken::new();
            state.errors = 0;
            (state.generation, state.cancel.clone())
        };

        self.logger.info("start callback worker", &self.fields());

        let result = self.run(generation, &cancel).await;
        self.finish(generation).await;

        self.logger.info("callback worker has been stopped", &self.fields());
        result
    }

    async fn stop(&self) -> Result<(), ProcessError> {
        {
            let mut state = self.state.lock().await;
            if !state.running {
                return Err(ProcessError::NotRunning {
                    name: self.name.clone(),
                });
            }
            state.cancel.cancel();
            state.running = false;
        }

        self.logger
            .info("worker has got signal for stopping", &self.fields());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::{Instant, sleep, timeout};

    use super::*;
    use crate::log::testing::RecordingLogger;

    async fn wait_for(flag: &AtomicBool) {
        timeout(Duration::from_secs(5), async {
            while !flag.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    fn failing(calls: Arc<AtomicU32>) -> CallbackWorker {
        CallbackWorker::new("failing", move |_token| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(ProcessError::other(format!("attempt {attempt} failed"))) }
        })
    }

    /// A callback that blocks until its token is canceled.
    fn waiting(entered: Arc<AtomicBool>) -> CallbackWorker {
        CallbackWorker::new("waiting", move |token: CancellationToken| {
            let entered = Arc::clone(&entered);
            async move {
                entered.store(true, Ordering::SeqCst);
                token.cancelled().await;
                Err(ProcessError::Canceled)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_is_returned_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let worker = failing(Arc::clone(&calls));

        let started = Instant::now();
        let err = worker.start().await.unwrap_err();

        assert_eq!(err.to_string(), "attempt 1 failed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(1));
        assert!(!worker.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_max_attempts_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let logger = Arc::new(RecordingLogger::default());
        let worker = failing(Arc::clone(&calls))
            .with_option(CallbackOption::RetryOnError(RetryOnErrorOpt::new(
                Duration::from_secs(1),
                3,
            )))
            .with_logger(logger.clone());

        let started = Instant::now();
        let err = worker.start().await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.to_string(), "attempt 3 failed");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(worker.error_count().await, 3);
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
        assert_eq!(logger.count("retrying execution of callback during error"), 2);
        assert_eq!(logger.count("start callback worker"), 1);
        assert_eq!(logger.count("callback worker has been stopped"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let worker = CallbackWorker::new("flaky", move |_token| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 5 {
                    Err(ProcessError::other("not yet"))
                } else {
                    Ok(())
                }
            }
        })
        .with_config(CallbackConfig {
            retry: Some(RetryOnErrorOpt::new(Duration::from_millis(10), 0)),
        });

        worker.start().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(worker.error_count().await, 4);
    }

    #[tokio::test]
    async fn string_panic_becomes_error_with_same_message() {
        let worker = CallbackWorker::new("panicky", |_token| async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::Panicked(_)));
        assert_eq!(err.to_string(), "kaboom");
    }

    #[tokio::test]
    async fn panic_before_future_is_built_is_caught() {
        fn explode(_token: CancellationToken) -> std::future::Ready<Result<(), ProcessError>> {
            panic!("sync kaboom")
        }
        let worker = CallbackWorker::new("eager", explode);

        let err = worker.start().await.unwrap_err();
        assert_eq!(err.to_string(), "sync kaboom");
    }

    #[tokio::test]
    async fn unrecognized_panic_payload_is_unknown_error() {
        let worker = CallbackWorker::new("odd", |_token| async {
            if true {
                std::panic::panic_any(17_u8);
            }
            Ok(())
        });

        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::UnknownPanic));
        assert_eq!(err.to_string(), "unknown error");
    }

    #[tokio::test(start_paused = true)]
    async fn panics_count_against_the_retry_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let worker = CallbackWorker::new("panicky", move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                if true {
                    panic!("again");
                }
                Ok(())
            }
        })
        .with_options([CallbackOption::RetryOnError(RetryOnErrorOpt::new(
            Duration::from_millis(5),
            2,
        ))]);

        let err = worker.start().await.unwrap_err();
        assert_eq!(err.to_string(), "again");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_cancels_callback_and_start_succeeds() {
        let entered = Arc::new(AtomicBool::new(false));
        let worker = Arc::new(waiting(Arc::clone(&entered)));

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.start().await })
        };
        wait_for(&entered).await;
        assert!(worker.is_running().await);

        worker.stop().await.unwrap();

        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn stop_without_start_is_not_running() {
        let worker = CallbackWorker::new("idle", |_token| async { Ok(()) });
        let err = worker.stop().await.unwrap_err();
        assert!(matches!(err, ProcessError::NotRunning { ref name } if name == "idle"));
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let entered = Arc::new(AtomicBool::new(false));
        let worker = Arc::new(waiting(Arc::clone(&entered)));

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.start().await })
        };
        wait_for(&entered).await;

        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyRunning { ref name } if name == "waiting"));

        worker.stop().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_backoff_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let worker = Arc::new(failing(Arc::clone(&calls)).with_option(
            CallbackOption::RetryOnError(RetryOnErrorOpt::new(Duration::from_secs(3600), 0)),
        ));

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.start().await })
        };
        timeout(Duration::from_secs(5), async {
            while worker.error_count().await == 0 {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        worker.stop().await.unwrap();

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_after_stop_gets_a_fresh_token() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let entered = Arc::new(AtomicBool::new(false));
        let worker = {
            let seen = Arc::clone(&seen);
            let entered = Arc::clone(&entered);
            Arc::new(CallbackWorker::new("restartable", move |token: CancellationToken| {
                seen.lock().unwrap().push(token.is_cancelled());
                let entered = Arc::clone(&entered);
                async move {
                    entered.store(true, Ordering::SeqCst);
                    token.cancelled().await;
                    Err(ProcessError::Canceled)
                }
            }))
        };

        for _ in 0..2 {
            entered.store(false, Ordering::SeqCst);
            let handle = {
                let worker = Arc::clone(&worker);
                tokio::spawn(async move { worker.start().await })
            };
            wait_for(&entered).await;
            worker.stop().await.unwrap();
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*seen.lock().unwrap(), vec![false, false]);
    }

    #[tokio::test]
    async fn natural_return_clears_running_flag() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let worker = CallbackWorker::new("oneshot", move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        worker.start().await.unwrap();
        assert!(!worker.is_running().await);
        assert!(matches!(
            worker.stop().await,
            Err(ProcessError::NotRunning { .. })
        ));

        worker.start().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
