use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Live status of a run, updated by every worker and read by reporters.
///
/// Each field is an independent scalar, so plain atomics are enough and no
/// lock is ever held across I/O.
#[derive(Debug)]
pub struct StatusLedger {
    active: AtomicUsize,
    bytes_sent: AtomicU64,
    service_available: AtomicBool,
}

impl StatusLedger {
    /// Starts with the service marked available, the startup probe has
    /// already seen it answer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            bytes_sent: AtomicU64::new(0),
            service_available: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn increment_active(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at zero.
    #[inline]
    pub fn decrement_active(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    #[inline]
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::AcqRel);
    }

    #[inline]
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_service_available(&self, available: bool) {
        self.service_available.store(available, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_service_available(&self) -> bool {
        self.service_available.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            active_connections: self.active_connections(),
            bytes_sent: self.bytes_sent(),
            service_available: self.is_service_available(),
        }
    }

    /// Counts one open connection until the returned guard is dropped.
    #[must_use]
    pub fn open_connection(self: &Arc<Self>) -> ActiveConnection {
        self.increment_active();
        ActiveConnection {
            ledger: Arc::clone(self),
        }
    }
}

impl Default for StatusLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerSnapshot {
    pub active_connections: usize,
    pub bytes_sent: u64,
    pub service_available: bool,
}

/// One slot of the active-connection counter, released on drop.
#[derive(Debug)]
pub struct ActiveConnection {
    ledger: Arc<StatusLedger>,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.ledger.decrement_active();
    }
}
