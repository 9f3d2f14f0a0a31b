//! Server worker: adapts an externally owned server to the [`Worker`] contract.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::ProcessError;
use crate::log::{self, LogFields, Logger};
use crate::worker::Worker;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The server was shut down. Not a failure from the worker's point of view.
    #[error("server closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// A network server whose listen loop blocks until it is shut down.
#[async_trait]
pub trait Server: Send + Sync {
    /// Address the server listens on, for log fields.
    fn addr(&self) -> String;

    /// Serve until shut down. Returns [`ServerError::Closed`] after a shutdown.
    async fn listen_and_serve(&self) -> Result<(), ServerError>;

    /// Graceful shutdown without deadline.
    async fn shutdown(&self) -> Result<(), ServerError>;
}

pub struct ServerWorker<S> {
    name: String,
    server: S,
    running: Mutex<bool>,
    logger: Arc<dyn Logger>,
}

impl<S: Server> ServerWorker<S> {
    pub fn new(name: impl Into<String>, server: S) -> Self {
        Self {
            name: name.into(),
            server,
            running: Mutex::new(false),
            logger: log::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }
}

fn into_process_error(err: ServerError) -> ProcessError {
    match err {
        ServerError::Io(err) => ProcessError::failed(err),
        other => ProcessError::failed(other),
    }
}

#[async_trait]
impl<S: Server> Worker for ServerWorker<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), ProcessError> {
        {
            let mut running = self.running.lock().await;
            if *running {
                return Err(ProcessError::ServerAlreadyRunning);
            }
            *running = true;
        }

        self.logger.info(
            "start server worker",
            &LogFields::worker(&self.name).with("listen", self.server.addr()),
        );

        let result = self.server.listen_and_serve().await;
        *self.running.lock().await = false;

        self.logger
            .info("server worker has been stopped", &LogFields::worker(&self.name));

        match result {
            Ok(()) | Err(ServerError::Closed) => Ok(()),
            Err(err) => Err(into_process_error(err)),
        }
    }

    async fn stop(&self) -> Result<(), ProcessError> {
        let mut running = self.running.lock().await;
        if !*running {
            return Err(ProcessError::ServerNotRunning);
        }

        let result = match self.server.shutdown().await {
            Ok(()) | Err(ServerError::Closed) => Ok(()),
            Err(err) => Err(into_process_error(err)),
        };
        *running = false;

        self.logger.info(
            "worker has got signal for stopping",
            &LogFields::worker(&self.name),
        );
        result
    }
}
