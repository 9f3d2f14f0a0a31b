//! Manager: supervises a dynamic group of workers.
//!
//! The group lives and dies together: as soon as any worker's `start()`
//! returns, successfully or not, the manager stops every other worker.
//!
//! Locking:
//! - the running flag and the worker set each have their own lock
//! - the order is always running flag, then worker set
//! - `start_all` and `stop_all` hold the running flag for their whole
//!   spawn/signal loop, so they serialize against each other and against
//!   `add_worker`

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use tokio::sync::RwLock;

use crate::error::ProcessError;
use crate::log::{self, LogFields, Logger};
use crate::wait_group::WaitGroup;
use crate::worker::Worker;

struct Inner {
    workers: RwLock<Vec<Arc<dyn Worker>>>,
    running: RwLock<bool>,
    pending: WaitGroup,
    logger: Arc<dyn Logger>,
}

/// Shared handle to a group of workers.
///
/// Cloning is cheap; every clone drives the same group.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a stopped manager that already holds `workers`.
    pub fn with_workers(workers: impl IntoIterator<Item = Arc<dyn Worker>>) -> Self {
        Self::builder().workers(workers).build()
    }

    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// Register a worker. If the manager is running, the worker is started
    /// right away; otherwise it waits for the next `start_all`.
    pub async fn add_worker(&self, worker: Arc<dyn Worker>) {
        let running = self.inner.running.read().await;
        let mut workers = self.inner.workers.write().await;

        workers.push(Arc::clone(&worker));
        if *running {
            self.spawn(worker);
        }
    }

    /// Start every registered worker on its own task.
    ///
    /// Calling it on a running manager only logs an error.
    pub async fn start_all(&self) {
        let mut running = self.inner.running.write().await;
        if *running {
            self.inner.logger.error(
                "manager is already running",
                &ProcessError::ManagerAlreadyRunning,
                &LogFields::new(),
            );
            return;
        }

        let workers = self.inner.workers.read().await;
        for worker in workers.iter() {
            self.spawn(Arc::clone(worker));
        }

        *running = true;
    }

    /// Signal every worker to stop. Only the call that flips the manager from
    /// running to stopped does the broadcast; any other call is a no-op.
    ///
    /// Does not wait for the workers to finish, see [`Manager::await_all`].
    /// The running flag stays locked while workers are signaled, so a
    /// worker's `stop()` must not call back into this manager.
    pub async fn stop_all(&self) {
        let mut running = self.inner.running.write().await;
        if !std::mem::replace(&mut *running, false) {
            return;
        }

        let workers = self.inner.workers.read().await.clone();
        for worker in workers {
            if let Err(err) = worker.stop().await {
                self.inner.logger.error(
                    "worker raised an error while stopping",
                    &err,
                    &LogFields::worker(worker.name()),
                );
            }
        }
    }

    /// Wait until every spawned worker task has finished.
    pub async fn await_all(&self) {
        self.inner.pending.wait().await;
        self.inner
            .logger
            .info("all background processes were stopped", &LogFields::new());
    }

    pub async fn is_running(&self) -> bool {
        *self.inner.running.read().await
    }

    pub async fn worker_count(&self) -> usize {
        self.inner.workers.read().await.len()
    }

    /// Number of worker tasks that have been spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.pending.count()
    }

    fn spawn(&self, worker: Arc<dyn Worker>) {
        self.inner.pending.add();
        let manager = self.clone();
        tokio::spawn(async move { manager.supervise(worker).await });
    }

    async fn supervise(&self, worker: Arc<dyn Worker>) {
        let _done = self.inner.pending.guard();
        let fields = LogFields::worker(worker.name());

        // stopped between spawn and now: the stop broadcast already went out
        if !self.is_running().await {
            self.inner
                .logger
                .info("manager stopped before worker could start", &fields);
            return;
        }

        let result = AssertUnwindSafe(worker.start())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ProcessError::from_panic(payload)));

        if let Err(err) = result {
            self.inner
                .logger
                .error("worker raised an error", &err, &fields);
        }

        self.stop_all().await;
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`Manager`].
///
/// ```ignore
/// let manager = Manager::builder()
///     .worker(Arc::new(my_worker))
///     .logger(Arc::new(TracingLogger))
///     .build();
/// ```
pub struct ManagerBuilder {
    workers: Vec<Arc<dyn Worker>>,
    logger: Arc<dyn Logger>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            logger: log::noop(),
        }
    }
}

impl ManagerBuilder {
    pub fn worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn workers(mut self, workers: impl IntoIterator<Item = Arc<dyn Worker>>) -> Self {
        self.workers.extend(workers);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Manager {
        Manager {
            inner: Arc::new(Inner {
                workers: RwLock::new(self.workers),
                running: RwLock::new(false),
                pending: WaitGroup::new(),
                logger: self.logger,
            }),
        }
    }
}
