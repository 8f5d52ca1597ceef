//! One slow connection, start to finish.
//!
//! A worker walks `Dialing -> Priming -> Trickling -> Closed`. It never
//! retries: the first dial or write failure ends it, and the engine does
//! not replace it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::connection::Connector;
use crate::error::WriteError;
use crate::ledger::StatusLedger;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum WorkerOutcome {
    /// No connection was established.
    DialFailed,
    /// The peer stopped taking bytes.
    WriteFailed,
    /// The run was shut down.
    Cancelled,
}

/// Write side of an open connection. Every byte that reaches the stream is
/// counted in the ledger, and every wait gives way to shutdown.
pub struct Session<'a, S> {
    stream: &'a mut S,
    ledger: &'a StatusLedger,
    shutdown: &'a CancellationToken,
}

impl<'a, S> Session<'a, S>
where
    S: AsyncWrite + Unpin,
{
    pub fn new(stream: &'a mut S, ledger: &'a StatusLedger, shutdown: &'a CancellationToken) -> Self {
        Self {
            stream,
            ledger,
            shutdown,
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        let Self {
            stream,
            ledger,
            shutdown,
        } = self;
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(WriteError::Cancelled),
            res = async {
                stream.write_all(bytes).await?;
                stream.flush().await
            } => {
                res?;
                ledger.add_bytes_sent(bytes.len() as u64);
                Ok(())
            }
        }
    }

    pub async fn pause(&self, delay: Duration) -> Result<(), WriteError> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(WriteError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// An inert extra header, enough to reset the peer's header read timer.
#[must_use]
pub fn keep_alive_fragment() -> String {
    format!("X-a: {}\r\n", rand::thread_rng().gen_range(1..5000u32))
}

pub struct Worker {
    id: usize,
    config: Arc<RunConfig>,
    connector: Arc<Connector>,
    ledger: Arc<StatusLedger>,
    shutdown: CancellationToken,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: usize,
        config: Arc<RunConfig>,
        connector: Arc<Connector>,
        ledger: Arc<StatusLedger>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            config,
            connector,
            ledger,
            shutdown,
        }
    }

    pub async fn run(self) -> WorkerOutcome {
        let id = self.id;
        debug!(worker = id, "dialing");
        let dialed = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return WorkerOutcome::Cancelled,
            res = self.connector.dial(self.config.connect_timeout()) => res,
        };
        let mut conn = match dialed {
            Ok(conn) => conn,
            Err(e) => {
                warn!(worker = id, error = %e, "dial failed");
                self.ledger.set_service_available(false);
                return WorkerOutcome::DialFailed;
            }
        };

        let _slot = self.ledger.open_connection();
        let outcome = self.hold(&mut conn).await;
        if outcome == WorkerOutcome::Cancelled {
            let _ = tokio::time::timeout(CLOSE_GRACE, conn.shutdown()).await;
        }
        drop(conn);
        debug!(worker = id, ?outcome, "closed");
        outcome
    }

    /// Runs priming and trickling on an already open stream.
    pub async fn hold<S>(&self, stream: &mut S) -> WorkerOutcome
    where
        S: AsyncWrite + Unpin,
    {
        let mut session = Session::new(stream, &self.ledger, &self.shutdown);
        match self.prime_and_trickle(&mut session).await {
            Ok(never) => match never {},
            Err(WriteError::Cancelled) => WorkerOutcome::Cancelled,
            Err(WriteError::Io(e)) => {
                debug!(worker = self.id, error = %e, "write failed");
                WorkerOutcome::WriteFailed
            }
        }
    }

    async fn prime_and_trickle<S>(&self, session: &mut Session<'_, S>) -> Result<Infallible, WriteError>
    where
        S: AsyncWrite + Unpin,
    {
        let delay = self.config.delay();
        debug!(worker = self.id, "priming");
        self.config
            .strategy()
            .produce(session, self.config.target(), delay)
            .await?;
        debug!(worker = self.id, "trickling");
        loop {
            session.pause(delay).await?;
            session.send(keep_alive_fragment().as_bytes()).await?;
        }
    }
}
