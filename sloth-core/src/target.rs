use std::fmt;

use url::Url;

use crate::error::ConfigError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[inline]
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// The endpoint under test. Parsed once, then shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: Scheme,
    host: String,
    port: u16,
    path_and_query: String,
}

impl Target {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(input)?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let host = match url.host() {
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(ConfigError::MissingHost),
        };
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        let port = url.port().unwrap_or(scheme.default_port());
        let mut path_and_query = url.path().to_string();
        if path_and_query.is_empty() {
            path_and_query.push('/');
        }
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }
        Ok(Self {
            scheme,
            host,
            port,
            path_and_query,
        })
    }

    #[inline]
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    #[must_use]
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    #[inline]
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Value for the `Host` header, port omitted when it is the scheme default.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = self.bracketed_host();
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `host:port` suitable for `TcpStream::connect`.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme.as_str(),
            self.authority(),
            self.path_and_query
        )
    }
}
