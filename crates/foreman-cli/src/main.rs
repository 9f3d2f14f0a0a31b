use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use foreman_core::{
    CallbackConfig, CallbackWorker, CancellationToken, Logger, Manager, ProcessError,
    RetryOnErrorOpt, TracingLogger,
};
use serde::Deserialize;
use tokio::time::{interval, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Demo settings, optionally read from the JSON file given as first argument.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoConfig {
    tick_ms: u64,
    /// How many times the flaky worker fails before it settles.
    flaky_failures: u32,
    flaky: CallbackConfig,
    /// Stop the whole group after this long. `None` runs until Ctrl-C.
    run_for_ms: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            flaky_failures: 2,
            flaky: CallbackConfig {
                retry: Some(RetryOnErrorOpt::new(Duration::from_millis(300), 5)),
            },
            run_for_ms: Some(3_000),
        }
    }
}

fn load_config() -> Result<DemoConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(DemoConfig::default()),
    }
}

/// Ticks until canceled.
fn ticker(tick_ms: u64) -> CallbackWorker {
    CallbackWorker::new("ticker", move |token: CancellationToken| async move {
        let mut ticks = interval(Duration::from_millis(tick_ms));
        let mut count = 0_u64;
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(ProcessError::Canceled),
                _ = ticks.tick() => {
                    count += 1;
                    info!(tick = count, "ticker is alive");
                }
            }
        }
    })
}

/// Fails `failures` times, then idles until canceled.
fn flaky(failures: u32) -> CallbackWorker {
    let remaining = Arc::new(AtomicU32::new(failures));
    CallbackWorker::new("flaky", move |token: CancellationToken| {
        let remaining = Arc::clone(&remaining);
        async move {
            let left = remaining.load(Ordering::SeqCst);
            if left > 0 {
                remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ProcessError::other(format!(
                    "intentional failure (left={left})"
                )));
            }
            info!("flaky worker settled");
            token.cancelled().await;
            Err(ProcessError::Canceled)
        }
    })
}

/// Returns after `run_for`, which takes the whole group down with it.
fn deadline(run_for: Duration) -> CallbackWorker {
    CallbackWorker::new("deadline", move |token: CancellationToken| async move {
        tokio::select! {
            _ = token.cancelled() => Err(ProcessError::Canceled),
            _ = sleep(run_for) => Ok(()),
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    info!(?config, "starting demo");

    let logger: Arc<dyn Logger> = Arc::new(TracingLogger);

    let manager = Manager::builder()
        .worker(Arc::new(ticker(config.tick_ms).with_logger(logger.clone())))
        .worker(Arc::new(
            flaky(config.flaky_failures)
                .with_config(config.flaky)
                .with_logger(logger.clone()),
        ))
        .logger(logger.clone())
        .build();

    manager.start_all().await;

    // workers may join a running group
    if let Some(ms) = config.run_for_ms {
        let worker = deadline(Duration::from_millis(ms)).with_logger(logger.clone());
        manager.add_worker(Arc::new(worker)).await;
    }

    let signals = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping workers");
            signals.stop_all().await;
        }
    });

    manager.await_all().await;
    Ok(())
}
