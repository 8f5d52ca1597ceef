use std::time::Duration;

use crate::error::ConfigError;
use crate::strategy::Strategy;
use crate::target::Target;

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything one run needs, fixed for its whole lifetime.
///
/// A concurrency of zero is accepted and makes an empty run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    target: Target,
    strategy: Strategy,
    concurrency: usize,
    delay: Duration,
    connect_timeout: Duration,
}

impl RunConfig {
    #[must_use]
    pub fn builder(target: Target) -> RunConfigBuilder {
        RunConfigBuilder {
            target,
            strategy: Strategy::Get,
            concurrency: DEFAULT_CONCURRENCY,
            delay: DEFAULT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[inline]
    #[must_use]
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    #[inline]
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Pause between body chunks and between keep-alive fragments.
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[derive(Debug)]
pub struct RunConfigBuilder {
    target: Target,
    strategy: Strategy,
    concurrency: usize,
    delay: Duration,
    connect_timeout: Duration,
}

impl RunConfigBuilder {
    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        if self.delay.is_zero() {
            return Err(ConfigError::ZeroDelay);
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        Ok(RunConfig {
            target: self.target,
            strategy: self.strategy,
            concurrency: self.concurrency,
            delay: self.delay,
            connect_timeout: self.connect_timeout,
        })
    }
}
