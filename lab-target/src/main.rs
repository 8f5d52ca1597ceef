//! A small HTTP/1 server to aim slowsloth at. It reports how many
//! connections it is holding so the effect of a run can be watched.

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use mimalloc::MiMalloc;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const INDEX: &[u8] = b"lab target up\n";

#[derive(Parser, Debug)]
#[command(name = "lab-target")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Seconds a client may take to finish its request headers
    #[arg(long, default_value_t = 30)]
    header_timeout: u64,
}

/// Open and total connection counts, shared by every connection task.
#[derive(Clone)]
struct ConnectionGauge {
    open: Arc<AtomicUsize>,
    accepted: Arc<AtomicU64>,
}

impl ConnectionGauge {
    #[must_use]
    fn new() -> Self {
        Self {
            open: Arc::new(AtomicUsize::new(0)),
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    #[must_use]
    fn opened(&self) -> OpenConnection {
        self.open.fetch_add(1, Ordering::AcqRel);
        self.accepted.fetch_add(1, Ordering::AcqRel);
        OpenConnection(self.clone())
    }

    #[inline]
    #[must_use]
    fn get(&self) -> GaugeResponse {
        GaugeResponse {
            open: self.open.load(Ordering::Acquire),
            accepted: self.accepted.load(Ordering::Acquire),
        }
    }
}

struct OpenConnection(ConnectionGauge);

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct GaugeResponse {
    open: usize,
    accepted: u64,
}

#[inline]
fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp
}

async fn my_service<B: Body>(
    gauge: ConnectionGauge,
    incoming: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if incoming.method() != Method::GET {
        return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
    }
    match incoming.uri().path() {
        "" | "/" => Ok(respond(StatusCode::OK, INDEX)),
        "/stats" => match serde_json::to_vec(&gauge.get()) {
            Ok(payload) => Ok(respond(StatusCode::OK, payload)),
            Err(_) => Ok(respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())),
        },
        _ => Ok(respond(StatusCode::NOT_FOUND, Bytes::new())),
    }
}

async fn run_app(sock: TcpListener, gauge: ConnectionGauge, header_timeout: Duration) {
    loop {
        let (tcp, peer) = match sock.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(error = %e, "accept failed");
                continue;
            }
        };
        let slot = gauge.opened();
        let sc = gauge.clone();
        let tcp = TokioIo::new(tcp);
        tokio::task::spawn(async move {
            let _slot = slot;
            let res = hyper::server::conn::http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(header_timeout)
                .serve_connection(tcp, service_fn(move |req| my_service(sc.clone(), req)))
                .await;
            if let Err(e) = res {
                debug!(%peer, error = %e, "connection ended");
            }
        });
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let _guard = rt.enter();
    rt.block_on(async {
        let sock = TcpListener::bind(&args.listen)
            .await
            .with_context(|| format!("Failed to bind {}", args.listen))?;
        info!(addr = %args.listen, header_timeout = args.header_timeout, "listening");
        let gauge = ConnectionGauge::new();
        let reporter = gauge.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let stats = reporter.get();
                info!(open = stats.open, accepted = stats.accepted, "connections");
            }
        });
        run_app(sock, gauge, Duration::from_secs(args.header_timeout)).await;
        Ok::<_, anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(header_timeout: Duration) -> (std::net::SocketAddr, ConnectionGauge) {
        let sock = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        let gauge = ConnectionGauge::new();
        tokio::spawn(run_app(sock, gauge.clone(), header_timeout));
        (addr, gauge)
    }

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: lab\r\nConnection: close\r\n\r\n");
        tcp.write_all(req.as_bytes()).await.unwrap();
        let mut out = String::new();
        tcp.read_to_string(&mut out).await.unwrap();
        out
    }

    async fn wait_open(gauge: &ConnectionGauge, expected: usize) {
        for _ in 0..1000 {
            if gauge.get().open == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("gauge never reached {expected}");
    }

    #[tokio::test]
    async fn serves_index_and_stats() {
        let (addr, _gauge) = start(Duration::from_secs(5)).await;
        let index = get(addr, "/").await;
        assert!(index.starts_with("HTTP/1.1 200 OK"));
        assert!(index.ends_with("lab target up\n"));

        let stats = get(addr, "/stats").await;
        let body = stats.split_once("\r\n\r\n").unwrap().1;
        let parsed: GaugeResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.open >= 1);
        assert!(parsed.accepted >= 2);

        assert!(get(addr, "/missing").await.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn unfinished_headers_hold_a_slot_until_timeout() {
        let (addr, gauge) = start(Duration::from_millis(300)).await;
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(b"GET / HTTP/1.1\r\nHost: lab\r\n").await.unwrap();
        wait_open(&gauge, 1).await;

        // The server gives up once the header timeout passes.
        let mut buf = Vec::new();
        let _ = tcp.read_to_end(&mut buf).await;
        wait_open(&gauge, 0).await;
    }
}
