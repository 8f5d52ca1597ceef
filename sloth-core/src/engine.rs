use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::connection::Connector;
use crate::error::ConfigError;
use crate::ledger::StatusLedger;
use crate::worker::{Worker, WorkerOutcome};

/// Spawns a fixed number of slow-connection workers against one target.
///
/// Workers that fail are not replaced. The ledger is readable at any time
/// through [`Engine::ledger`], and [`Engine::shutdown`] asks every worker to
/// close its connection.
pub struct Engine {
    config: Arc<RunConfig>,
    connector: Arc<Connector>,
    ledger: Arc<StatusLedger>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        Self::with_ledger(config, Arc::new(StatusLedger::new()))
    }

    /// Uses a ledger created by the caller, e.g. one a poller already writes to.
    pub fn with_ledger(config: RunConfig, ledger: Arc<StatusLedger>) -> Result<Self, ConfigError> {
        let connector = Connector::new(config.target())?;
        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            ledger,
            shutdown: CancellationToken::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> Arc<StatusLedger> {
        Arc::clone(&self.ledger)
    }

    #[inline]
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Starts all workers. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self) -> RunHandle {
        let concurrency = self.config.concurrency();
        info!(
            url = %self.config.target(),
            method = %self.config.strategy().method(),
            concurrency,
            delay = ?self.config.delay(),
            "starting run"
        );
        let mut tasks = Vec::with_capacity(concurrency);
        for id in 0..concurrency {
            let worker = Worker::new(
                id,
                Arc::clone(&self.config),
                Arc::clone(&self.connector),
                Arc::clone(&self.ledger),
                self.shutdown.clone(),
            );
            tasks.push(tokio::spawn(worker.run()));
        }
        RunHandle {
            tasks,
            ledger: Arc::clone(&self.ledger),
            shutdown: self.shutdown.clone(),
            started: Instant::now(),
        }
    }

    pub async fn run(&self) -> RunSummary {
        self.spawn().wait().await
    }
}

/// The workers of one run. Dropping it without waiting shuts them down.
pub struct RunHandle {
    tasks: Vec<JoinHandle<WorkerOutcome>>,
    ledger: Arc<StatusLedger>,
    shutdown: CancellationToken,
    started: Instant,
}

impl RunHandle {
    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.tasks.len()
    }

    /// Resolves once every worker has closed its connection.
    pub async fn wait(mut self) -> RunSummary {
        let tasks = std::mem::take(&mut self.tasks);
        let mut summary = RunSummary {
            workers: tasks.len(),
            ..RunSummary::default()
        };
        for t in tasks {
            match t.await {
                Ok(outcome) => summary.record(outcome),
                Err(e) if e.is_panic() => {
                    warn!(error = %e, "worker panicked");
                    summary.panicked += 1;
                }
                Err(_) => summary.cancelled += 1,
            }
        }
        summary.bytes_sent = self.ledger.bytes_sent();
        summary.elapsed = self.started.elapsed();
        info!(
            workers = summary.workers,
            dial_failures = summary.dial_failures,
            write_failures = summary.write_failures,
            cancelled = summary.cancelled,
            bytes_sent = summary.bytes_sent,
            "run finished"
        );
        summary
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.shutdown.cancel();
        }
    }
}

/// How the workers of a finished run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub workers: usize,
    pub dial_failures: usize,
    pub write_failures: usize,
    pub cancelled: usize,
    pub panicked: usize,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::DialFailed => self.dial_failures += 1,
            WorkerOutcome::WriteFailed => self.write_failures += 1,
            WorkerOutcome::Cancelled => self.cancelled += 1,
        }
    }
}
