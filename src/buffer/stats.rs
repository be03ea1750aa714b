//! Write-back statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::flush::FlushReason;

/// Statistics tracked by the write-back layer.
///
/// All fields are atomic for lock-free, thread-safe updates; counters are
/// bumped from caller operations and flush completions alike.
///
/// # Memory Ordering
/// All operations use `Ordering::Relaxed`: each counter only needs to be
/// atomic, not ordered with respect to the others.
///
/// # Example
/// ```
/// use writeback::WriteBackStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = WriteBackStats::new();
/// stats.writes_buffered.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().writes_buffered, 1);
/// ```
#[derive(Debug)]
pub struct WriteBackStats {
    /// Writes acknowledged and buffered.
    pub writes_buffered: AtomicU64,

    /// Bytes acknowledged and buffered.
    pub bytes_buffered: AtomicU64,

    /// Flushes issued because a write did not continue the current run.
    pub seek_flushes: AtomicU64,

    /// Flushes issued because the aggregate threshold was reached.
    pub threshold_flushes: AtomicU64,

    /// Flushes forced by read, flush, fsync, release or flush-all.
    pub sync_flushes: AtomicU64,

    /// Backend writes that completed successfully.
    pub backend_writes: AtomicU64,

    /// Bytes those backend writes carried.
    pub bytes_flushed: AtomicU64,

    /// Pages coalesced into those backend writes.
    pub pages_flushed: AtomicU64,

    /// Backend write failures stored as deferred errors.
    pub deferred_errors_recorded: AtomicU64,

    /// Deferred errors handed to a caller.
    pub deferred_errors_delivered: AtomicU64,

    pub sessions_created: AtomicU64,

    pub sessions_destroyed: AtomicU64,
}

impl WriteBackStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            writes_buffered: AtomicU64::new(0),
            bytes_buffered: AtomicU64::new(0),
            seek_flushes: AtomicU64::new(0),
            threshold_flushes: AtomicU64::new(0),
            sync_flushes: AtomicU64::new(0),
            backend_writes: AtomicU64::new(0),
            bytes_flushed: AtomicU64::new(0),
            pages_flushed: AtomicU64::new(0),
            deferred_errors_recorded: AtomicU64::new(0),
            deferred_errors_delivered: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_destroyed: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_flush_issued(&self, reason: FlushReason) {
        let counter = match reason {
            FlushReason::Seek => &self.seek_flushes,
            FlushReason::Threshold => &self.threshold_flushes,
            FlushReason::SyncPoint => &self.sync_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    ///
    /// This returns a non-atomic copy for display/logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            writes_buffered: self.writes_buffered.load(Ordering::Relaxed),
            bytes_buffered: self.bytes_buffered.load(Ordering::Relaxed),
            seek_flushes: self.seek_flushes.load(Ordering::Relaxed),
            threshold_flushes: self.threshold_flushes.load(Ordering::Relaxed),
            sync_flushes: self.sync_flushes.load(Ordering::Relaxed),
            backend_writes: self.backend_writes.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            pages_flushed: self.pages_flushed.load(Ordering::Relaxed),
            deferred_errors_recorded: self.deferred_errors_recorded.load(Ordering::Relaxed),
            deferred_errors_delivered: self.deferred_errors_delivered.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_destroyed: self.sessions_destroyed.load(Ordering::Relaxed),
        }
    }
}

impl Default for WriteBackStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of write-back statistics.
///
/// Unlike `WriteBackStats`, this is not atomic and can be safely
/// printed, compared, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub writes_buffered: u64,
    pub bytes_buffered: u64,
    pub seek_flushes: u64,
    pub threshold_flushes: u64,
    pub sync_flushes: u64,
    pub backend_writes: u64,
    pub bytes_flushed: u64,
    pub pages_flushed: u64,
    pub deferred_errors_recorded: u64,
    pub deferred_errors_delivered: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
}

impl StatsSnapshot {
    /// Total flushes issued for any reason.
    pub fn flushes_issued(&self) -> u64 {
        self.seek_flushes + self.threshold_flushes + self.sync_flushes
    }

    /// Average number of buffered writes folded into one backend write.
    pub fn aggregation_ratio(&self) -> f64 {
        if self.backend_writes == 0 {
            0.0
        } else {
            self.pages_flushed as f64 / self.backend_writes as f64
        }
    }

    /// Sessions created and not yet destroyed.
    pub fn live_sessions(&self) -> u64 {
        self.sessions_created.saturating_sub(self.sessions_destroyed)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ writes: {}, flushes: {} (seek {}, threshold {}, sync {}), backend writes: {}, ratio: {:.2}, deferred errors: {}/{} }}",
            self.writes_buffered,
            self.flushes_issued(),
            self.seek_flushes,
            self.threshold_flushes,
            self.sync_flushes,
            self.backend_writes,
            self.aggregation_ratio(),
            self.deferred_errors_delivered,
            self.deferred_errors_recorded,
        )
    }
}
