//! Request shaping: what a worker writes before it starts trickling.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::AsyncWrite;

use crate::error::{ConfigError, WriteError};
use crate::target::Target;
use crate::user_agent;
use crate::worker::Session;

pub const DEFAULT_CHUNK_SIZE: usize = 10;
pub const DEFAULT_INFLATED_LENGTH: u64 = 1_000_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Method {
    Get,
    Post,
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Method::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Method::Post)
        } else {
            Err(ConfigError::UnknownMethod(s.to_string()))
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// What the `Content-Length` header of a POST claims.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ContentLength {
    /// The real body length in bytes.
    Exact,
    /// A fixed value larger than the body, the server keeps waiting for the rest.
    Inflated(u64),
}

impl Default for ContentLength {
    fn default() -> Self {
        ContentLength::Inflated(DEFAULT_INFLATED_LENGTH)
    }
}

impl FromStr for ContentLength {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("exact") {
            return Ok(ContentLength::Exact);
        }
        s.parse().map(ContentLength::Inflated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostBody {
    body: String,
    chunk_size: NonZeroUsize,
    content_length: ContentLength,
}

impl PostBody {
    pub fn new(body: impl Into<String>) -> Result<Self, ConfigError> {
        let body = body.into();
        if body.is_empty() {
            return Err(ConfigError::EmptyBody);
        }
        let mut post = Self {
            body,
            chunk_size: NonZeroUsize::MIN,
            content_length: ContentLength::default(),
        };
        post = post.with_chunk_size(DEFAULT_CHUNK_SIZE)?;
        post.check_content_length()?;
        Ok(post)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, ConfigError> {
        self.chunk_size = NonZeroUsize::new(chunk_size).ok_or(ConfigError::ZeroChunkSize)?;
        Ok(self)
    }

    pub fn with_content_length(mut self, content_length: ContentLength) -> Result<Self, ConfigError> {
        self.content_length = content_length;
        self.check_content_length()?;
        Ok(self)
    }

    fn check_content_length(&self) -> Result<(), ConfigError> {
        let actual = self.body.len() as u64;
        match self.content_length {
            ContentLength::Inflated(declared) if declared <= actual => {
                Err(ConfigError::ContentLengthTooSmall { declared, actual })
            }
            _ => Ok(()),
        }
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    #[inline]
    #[must_use]
    pub fn content_length(&self) -> ContentLength {
        self.content_length
    }

    /// Value written in the `Content-Length` header.
    #[must_use]
    pub fn declared_length(&self) -> u64 {
        match self.content_length {
            ContentLength::Exact => self.body.len() as u64,
            ContentLength::Inflated(n) => n,
        }
    }

    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        chunk_body(&self.body, self.chunk_size)
    }
}

/// How one connection's request is built and fed to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Headers only, never terminated.
    Get,
    /// Full header block, then the body in delayed chunks.
    Post(PostBody),
}

impl Strategy {
    /// Builds the strategy for `method`, `data` is required for POST.
    pub fn from_method(method: Method, data: Option<String>) -> Result<Self, ConfigError> {
        match method {
            Method::Get => Ok(Strategy::Get),
            Method::Post => Ok(Strategy::Post(PostBody::new(data.unwrap_or_default())?)),
        }
    }

    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Strategy::Get => Method::Get,
            Strategy::Post(_) => Method::Post,
        }
    }

    /// Writes the request preamble, and for POST the whole body, pausing
    /// `delay` between body chunks. The first write error is returned as is.
    pub async fn produce<S>(
        &self,
        session: &mut Session<'_, S>,
        target: &Target,
        delay: Duration,
    ) -> Result<(), WriteError>
    where
        S: AsyncWrite + Unpin,
    {
        let ua = user_agent::random();
        match self {
            Strategy::Get => session.send(get_preamble(target, ua).as_bytes()).await,
            Strategy::Post(post) => {
                let head = post_preamble(target, ua, post.declared_length());
                session.send(head.as_bytes()).await?;
                let mut chunks = post.chunks().peekable();
                while let Some(chunk) = chunks.next() {
                    session.send(chunk.as_bytes()).await?;
                    // The caller's trickle loop owns the pause after the last chunk.
                    if chunks.peek().is_some() {
                        session.pause(delay).await?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Request line and headers without the blank line that ends the header block.
#[must_use]
pub fn get_preamble(target: &Target, user_agent: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\n",
        target.path_and_query(),
        target.authority(),
        user_agent
    )
}

/// Complete POST header block, blank line included.
#[must_use]
pub fn post_preamble(target: &Target, user_agent: &str, content_length: u64) -> String {
    format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nContent-Length: {}\r\n\r\n",
        target.path_and_query(),
        target.authority(),
        user_agent,
        content_length
    )
}

/// Splits `body` into pieces of at most `size` characters.
pub fn chunk_body(body: &str, size: NonZeroUsize) -> impl Iterator<Item = &str> {
    let size = size.get();
    let mut rest = body;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let split = rest
            .char_indices()
            .nth(size)
            .map_or(rest.len(), |(idx, _)| idx);
        let (head, tail) = rest.split_at(split);
        rest = tail;
        Some(head)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StatusLedger;
    use proptest::prelude::*;
    use super::Strategy;
    use tokio_util::sync::CancellationToken;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn target() -> Target {
        Target::parse("http://127.0.0.1:8080/search?q=1").unwrap()
    }

    #[test]
    fn chunk_size_equal_to_body_yields_one_chunk() {
        let chunks: Vec<_> = chunk_body("abcdefghij", nz(10)).collect();
        assert_eq!(chunks, vec!["abcdefghij"]);
    }

    #[test]
    fn chunk_size_three_leaves_a_tail() {
        let chunks: Vec<_> = chunk_body("abcdefghij", nz(3)).collect();
        assert_eq!(chunks, vec!["abc", "def", "ghi", "j"]);
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let chunks: Vec<_> = chunk_body("héllo wörld", nz(4)).collect();
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
    }

    #[test]
    fn get_preamble_is_never_terminated() {
        let head = get_preamble(&target(), "ua");
        assert_eq!(
            head,
            "GET /search?q=1 HTTP/1.1\r\nHost: 127.0.0.1:8080\r\nUser-Agent: ua\r\n"
        );
        assert!(!head.contains("\r\n\r\n"));
    }

    #[test]
    fn post_declares_inflated_length_by_default() {
        let post = PostBody::new("abcdefghij").unwrap();
        assert_eq!(post.declared_length(), DEFAULT_INFLATED_LENGTH);
        let exact = post.with_content_length(ContentLength::Exact).unwrap();
        assert_eq!(exact.declared_length(), 10);
    }

    #[test]
    fn post_validation() {
        assert!(matches!(PostBody::new(""), Err(ConfigError::EmptyBody)));
        assert!(matches!(
            PostBody::new("abc").unwrap().with_chunk_size(0),
            Err(ConfigError::ZeroChunkSize)
        ));
        assert!(matches!(
            PostBody::new("abcdef")
                .unwrap()
                .with_content_length(ContentLength::Inflated(6)),
            Err(ConfigError::ContentLengthTooSmall { declared: 6, actual: 6 })
        ));
        assert!(matches!(
            Strategy::from_method(Method::Post, None),
            Err(ConfigError::EmptyBody)
        ));
    }

    #[test]
    fn parses_methods_and_lengths() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("POST".parse::<Method>().unwrap(), Method::Post);
        assert!("PUT".parse::<Method>().is_err());
        assert_eq!("exact".parse::<ContentLength>().unwrap(), ContentLength::Exact);
        assert_eq!(
            "4096".parse::<ContentLength>().unwrap(),
            ContentLength::Inflated(4096)
        );
    }

    #[tokio::test]
    async fn get_writes_unterminated_headers() {
        let ledger = StatusLedger::new();
        let shutdown = CancellationToken::new();
        let mut out = Vec::new();
        let mut session = Session::new(&mut out, &ledger, &shutdown);
        Strategy::Get
            .produce(&mut session, &target(), Duration::from_millis(1))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("GET /search?q=1 HTTP/1.1\r\nHost: 127.0.0.1:8080\r\nUser-Agent: "));
        assert!(text.ends_with("\r\n"));
        assert!(!text.contains("\r\n\r\n"));
        assert_eq!(ledger.bytes_sent(), text.len() as u64);
    }

    #[tokio::test]
    async fn post_writes_headers_then_whole_body() {
        let ledger = StatusLedger::new();
        let shutdown = CancellationToken::new();
        let post = PostBody::new("abcdefghij").unwrap().with_chunk_size(3).unwrap();
        let mut out = Vec::new();
        let mut session = Session::new(&mut out, &ledger, &shutdown);
        Strategy::Post(post)
            .produce(&mut session, &target(), Duration::from_millis(1))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("POST /search?q=1 HTTP/1.1\r\n"));
        assert!(head.ends_with("Content-Length: 1000000"));
        assert_eq!(body, "abcdefghij");
        assert_eq!(ledger.bytes_sent(), text.len() as u64);
    }

    #[tokio::test]
    async fn post_stops_when_shutdown_fires() {
        let ledger = StatusLedger::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let post = PostBody::new("abcdefghij").unwrap();
        let mut out = Vec::new();
        let mut session = Session::new(&mut out, &ledger, &shutdown);
        let res = Strategy::Post(post)
            .produce(&mut session, &target(), Duration::from_secs(60))
            .await;
        assert!(matches!(res, Err(WriteError::Cancelled)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn post_returns_right_after_the_last_chunk() {
        let ledger = StatusLedger::new();
        let shutdown = CancellationToken::new();
        let post = PostBody::new("abc").unwrap();
        let mut out = Vec::new();
        let mut session = Session::new(&mut out, &ledger, &shutdown);
        let strategy = Strategy::Post(post);
        let produced = tokio::time::timeout(
            Duration::from_secs(2),
            strategy.produce(&mut session, &target(), Duration::from_secs(60)),
        )
        .await;
        assert!(matches!(produced, Ok(Ok(()))));
        assert!(String::from_utf8(out).unwrap().ends_with("\r\n\r\nabc"));
    }

    proptest! {
        #[test]
        fn chunking_round_trips(body in "\\PC{0,200}", size in 1usize..32) {
            let chunks: Vec<_> = chunk_body(&body, nz(size)).collect();
            let len = body.chars().count();
            prop_assert_eq!(chunks.len(), len.div_ceil(size));
            prop_assert!(chunks.iter().all(|c| c.chars().count() <= size));
            prop_assert_eq!(chunks.concat(), body);
        }
    }
}
