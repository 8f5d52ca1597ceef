use std::time::Duration;

/// Problems with the run setup. Surfaced before any worker is spawned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid target url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
    #[error("target url has no host")]
    MissingHost,
    #[error("unknown method {0:?}, expected GET or POST")]
    UnknownMethod(String),
    #[error("delay between header sends must be non-zero")]
    ZeroDelay,
    #[error("connect timeout must be non-zero")]
    ZeroConnectTimeout,
    #[error("POST requires a non-empty body")]
    EmptyBody,
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
    #[error("inflated content length {declared} must exceed the body length {actual}")]
    ContentLengthTooSmall { declared: u64, actual: u64 },
    #[error("failed to build tls client: {0}")]
    Tls(#[from] rustls::Error),
}

/// A connection could not be established. Ends one worker only.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("tls handshake failed: {0}")]
    Tls(#[source] std::io::Error),
    #[error("invalid tls server name {0:?}")]
    InvalidServerName(String),
}

/// The peer stopped accepting bytes, or the run is shutting down.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("shutdown requested")]
    Cancelled,
}
