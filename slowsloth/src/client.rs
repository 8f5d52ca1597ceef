use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONNECTION, HOST, USER_AGENT};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use sloth_core::{user_agent, Connector, StatusLedger, Target};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::drain::DiscardBody;

const MAX_DRAIN: usize = 1024 * 1024;

#[inline]
fn empty_body() -> Full<Bytes> {
    Full::new(Bytes::new())
}

/// Sends one ordinary GET to the target to see whether it still answers.
#[derive(Clone)]
pub struct HttpProbe {
    target: Target,
    connector: Arc<Connector>,
    timeout: Duration,
}

impl HttpProbe {
    #[must_use]
    pub fn new(target: Target, connector: Arc<Connector>, timeout: Duration) -> Self {
        Self {
            target,
            connector,
            timeout,
        }
    }

    pub async fn status(&self) -> Result<StatusCode> {
        tokio::time::timeout(self.timeout, self.send_recv())
            .await
            .with_context(|| format!("Probe timed out after {:?}", self.timeout))?
    }

    /// `true` only for a `200 OK`.
    pub async fn is_available(&self) -> bool {
        match self.status().await {
            Ok(status) => status == StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "probe failed");
                false
            }
        }
    }

    async fn send_recv(&self) -> Result<StatusCode> {
        let conn = self
            .connector
            .dial(self.timeout)
            .await
            .context("Failed to connect")?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(conn))
            .await
            .context("Failed http handshake")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "probe connection ended");
            }
        });
        let request = Request::get(self.target.path_and_query())
            .header(HOST, self.target.authority())
            .header(USER_AGENT, user_agent::random())
            .header(CONNECTION, "close")
            .body(empty_body())
            .context("Failed to build probe request")?;
        let resp = sender
            .send_request(request)
            .await
            .context("Failed to send request")?;
        let status = resp.status();
        DiscardBody::new(resp.into_body(), MAX_DRAIN).await?;
        Ok(status)
    }
}

/// Re-probes the target every `interval` and stores the answer in the ledger.
pub async fn poll_availability(
    probe: HttpProbe,
    ledger: Arc<StatusLedger>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            available = probe.is_available() => ledger.set_service_available(available),
        }
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
    }
}
