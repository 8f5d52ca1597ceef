use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use hyper::StatusCode;
use sloth_core::{Connector, Engine, RunConfig, StatusLedger, Strategy, Target};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{poll_availability, HttpProbe};
use crate::statistics::{
    final_status, status_line, unix_now, write_report, MemoryGauge, Recorder, RunReport, Sample,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const REPORT_EVERY: Duration = Duration::from_secs(1);

/// Everything the CLI decided before the run starts.
#[derive(Debug)]
pub(crate) struct Scenario {
    pub target: Target,
    pub strategy: Strategy,
    pub concurrency: usize,
    pub delay: Duration,
    pub connect_timeout: Duration,
    pub check_interval: Duration,
    pub duration: Option<Duration>,
    pub report: Option<PathBuf>,
    pub probe: bool,
}

pub(crate) async fn run(scenario: Scenario) -> anyhow::Result<()> {
    let connector = Arc::new(Connector::new(&scenario.target).context("Failed to set up tls")?);
    let probe = HttpProbe::new(scenario.target.clone(), connector, PROBE_TIMEOUT);
    if scenario.probe {
        let status = probe
            .status()
            .await
            .context("Service is not available at startup")?;
        if status != StatusCode::OK {
            bail!("Service is not available at startup: got {status}");
        }
    }

    let config = RunConfig::builder(scenario.target.clone())
        .strategy(scenario.strategy)
        .concurrency(scenario.concurrency)
        .delay(scenario.delay)
        .connect_timeout(scenario.connect_timeout)
        .build()
        .context("Invalid run configuration")?;
    let engine = Engine::new(config).context("Failed to create engine")?;
    let ledger = engine.ledger();
    let shutdown = engine.shutdown_token();
    let started_at_unix = unix_now();

    let handle = engine.spawn();
    let poller = tokio::spawn(poll_availability(
        probe,
        Arc::clone(&ledger),
        scenario.check_interval,
        shutdown.clone(),
    ));
    let reporting = CancellationToken::new();
    let reporter = tokio::spawn(report_status(Arc::clone(&ledger), reporting.clone()));
    let stopper = tokio::spawn(stop_on_signal(shutdown.clone(), scenario.duration));

    let summary = handle.wait().await;
    shutdown.cancel();
    reporting.cancel();
    let samples = reporter.await.context("Failed to join reporter")?;
    poller.await.context("Failed to join poller")?;
    stopper.abort();

    let snapshot = ledger.snapshot();
    let memory_mb = MemoryGauge::new().used_mb();
    print!("\r{}\r", " ".repeat(120));
    println!("{}", final_status(&summary, &snapshot, memory_mb));
    println!("All requests completed.");

    if let Some(path) = &scenario.report {
        let cfg = engine.config();
        let report = RunReport {
            target: cfg.target().to_string(),
            method: cfg.strategy().method(),
            concurrency: cfg.concurrency(),
            delay_secs: cfg.delay().as_secs(),
            started_at_unix,
            summary: &summary,
            final_status: snapshot,
            samples: &samples,
        };
        write_report(path, &report)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

/// Redraws the status line once a second until `done` fires.
async fn report_status(ledger: Arc<StatusLedger>, done: CancellationToken) -> Vec<Sample> {
    let mut recorder = Recorder::new();
    let mut memory = MemoryGauge::new();
    let mut ticker = tokio::time::interval(REPORT_EVERY);
    loop {
        tokio::select! {
            () = done.cancelled() => break,
            _ = ticker.tick() => {
                let sample = recorder.record(ledger.snapshot(), memory.used_mb());
                let mut out = std::io::stdout().lock();
                let _ = write!(out, "{}", status_line(&sample));
                let _ = out.flush();
            }
        }
    }
    recorder.into_samples()
}

/// Cancels the run on Ctrl-C, or once `duration` has passed.
async fn stop_on_signal(shutdown: CancellationToken, duration: Option<Duration>) {
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    let interrupted = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, closing connections"),
            Err(e) => {
                // Without a handler only the deadline or the run itself can end things.
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = interrupted => {}
        () = deadline => info!("run duration elapsed, closing connections"),
        () = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
