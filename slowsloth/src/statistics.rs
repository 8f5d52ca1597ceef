use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use sloth_core::{LedgerSnapshot, Method, RunSummary};
use sysinfo::{Pid, System};

const RESET: &str = "\x1b[0m";
const GREEN: &str = "\x1b[1m\x1b[32m";
const RED: &str = "\x1b[1m\x1b[31m";

/// Resident memory of this process.
pub struct MemoryGauge {
    system: System,
    pid: Option<Pid>,
}

impl MemoryGauge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn used_mb(&mut self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        self.system.refresh_process(pid);
        self.system
            .process(pid)
            .map_or(0, |p| p.memory() / 1024 / 1024)
    }
}

#[derive(Debug, Copy, Clone, serde::Serialize)]
pub struct Sample {
    pub elapsed_ms: u64,
    pub active_connections: usize,
    pub service_available: bool,
    pub memory_mb: u64,
    pub bytes_sent: u64,
}

/// One sample per reporter tick, kept for the final report.
pub struct Recorder {
    started: Instant,
    samples: Vec<Sample>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            samples: Vec::new(),
        }
    }

    pub fn record(&mut self, snapshot: LedgerSnapshot, memory_mb: u64) -> Sample {
        let sample = Sample {
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            active_connections: snapshot.active_connections,
            service_available: snapshot.service_available,
            memory_mb,
            bytes_sent: snapshot.bytes_sent,
        };
        self.samples.push(sample);
        sample
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

#[must_use]
pub fn status_line(sample: &Sample) -> String {
    let (color, word) = if sample.service_available {
        (GREEN, "YES")
    } else {
        (RED, "NO")
    };
    format!(
        "\rTotal active connections: {}, Service availability: {color}{word}{RESET}, Total RAM usage: {} MB, Total bytes sent: {}",
        sample.active_connections, sample.memory_mb, sample.bytes_sent
    )
}

#[must_use]
pub fn final_status(summary: &RunSummary, snapshot: &LedgerSnapshot, memory_mb: u64) -> String {
    format!(
        "\
Final Status:
    active connections    = {}
    service available     = {}
    total RAM usage       = {} MB
    total bytes sent      = {}
    workers               = {}
    dial failures         = {}
    write failures        = {}
    closed on shutdown    = {}
    elapsed               = {:.1} s",
        snapshot.active_connections,
        snapshot.service_available,
        memory_mb,
        snapshot.bytes_sent,
        summary.workers,
        summary.dial_failures,
        summary.write_failures,
        summary.cancelled,
        summary.elapsed.as_secs_f64(),
    )
}

#[derive(Debug, serde::Serialize)]
pub struct RunReport<'a> {
    pub target: String,
    pub method: Method,
    pub concurrency: usize,
    pub delay_secs: u64,
    pub started_at_unix: u64,
    pub summary: &'a RunSummary,
    pub final_status: LedgerSnapshot,
    pub samples: &'a [Sample],
}

#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

pub fn write_report(path: &Path, report: &RunReport<'_>) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
