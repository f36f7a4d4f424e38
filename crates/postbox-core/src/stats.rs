use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Counters for jobs executed by the postbox writer
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionStats {
    /// Jobs that committed
    pub committed: u64,
    /// Jobs that failed or were refused after the store was poisoned
    pub failed: u64,
    /// Time spent executing committed jobs, views included
    pub total_duration: Duration,
    /// Slowest single committed job
    pub peak_duration: Duration,
    /// Commit sequence number of the latest committed job
    pub last_version: u64,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&mut self, duration: Duration, version: u64) {
        self.committed += 1;
        self.total_duration += duration;
        self.peak_duration = self.peak_duration.max(duration);
        self.last_version = version;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn average_duration(&self) -> Duration {
        if self.committed == 0 {
            return Duration::ZERO;
        }
        let average = self.total_duration.as_nanos() / u128::from(self.committed);
        Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX))
    }
}

/// Thread-safe wrapper for transaction stats
#[derive(Debug, Clone)]
pub struct SharedTransactionStats {
    inner: Arc<RwLock<TransactionStats>>,
}

impl Default for SharedTransactionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedTransactionStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TransactionStats::new())),
        }
    }

    pub fn record_commit(&self, duration: Duration, version: u64) {
        if let Ok(mut stats) = self.inner.write() {
            stats.record_commit(duration, version);
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut stats) = self.inner.write() {
            stats.record_failure();
        }
    }

    pub fn snapshot(&self) -> TransactionStats {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}
