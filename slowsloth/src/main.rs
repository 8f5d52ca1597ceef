use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use sloth_core::{ConfigError, ContentLength, Method, Strategy, Target};

use crate::scenario::{run, Scenario};

mod client;
mod drain;
mod scenario;
mod statistics;

/// Holds many HTTP requests open against one target by sending them
/// slowly. Only point it at servers you are allowed to test.
#[derive(Parser, Debug)]
#[command(name = "slowsloth", version)]
struct Args {
    /// Target URL (http or https)
    #[arg(short = 'u', long = "url", value_parser = Target::parse)]
    url: Target,

    /// HTTP method: GET or POST
    #[arg(short = 'm', long, default_value = "GET")]
    method: Method,

    /// Body for POST requests
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Number of connections to hold open
    #[arg(short = 'c', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: u32,

    /// Seconds between header (or body chunk) sends
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    delay: u64,

    /// Seconds to wait for a connection to open
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout: u64,

    /// Characters per POST body chunk
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Declared POST Content-Length: "exact" or a number larger than the body
    #[arg(long, default_value = "1000000")]
    content_length: ContentLength,

    /// Seconds between availability checks
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    check_interval: u64,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Write a JSON report of the run to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Skip the startup availability check
    #[arg(long)]
    no_probe: bool,
}

impl Args {
    fn strategy(&self) -> Result<Strategy, clap::Error> {
        let invalid = |e: ConfigError| Args::command().error(ErrorKind::ValueValidation, e);
        match Strategy::from_method(self.method, self.data.clone()) {
            Ok(Strategy::Post(post)) => {
                let chunk_size = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);
                post.with_chunk_size(chunk_size)
                    .and_then(|p| p.with_content_length(self.content_length))
                    .map(Strategy::Post)
                    .map_err(invalid)
            }
            Ok(strategy) => Ok(strategy),
            Err(ConfigError::EmptyBody) => Err(Args::command().error(
                ErrorKind::MissingRequiredArgument,
                "data must be provided for POST requests with the -d flag",
            )),
            Err(e) => Err(invalid(e)),
        }
    }

    fn into_scenario(self) -> Result<Scenario, clap::Error> {
        let strategy = self.strategy()?;
        Ok(Scenario {
            target: self.url,
            strategy,
            concurrency: self.concurrency as usize,
            delay: Duration::from_secs(self.delay),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            check_interval: Duration::from_secs(self.check_interval),
            duration: self.duration.map(Duration::from_secs),
            report: self.report,
            probe: !self.no_probe,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let scenario = match Args::parse().into_scenario() {
        Ok(s) => s,
        Err(e) => e.exit(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let _guard = rt.enter();
    rt.block_on(run(scenario))
}
