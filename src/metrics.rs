// Performance metrics module
//
// Lightweight counters for task execution, refreshes and downloads

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-lifetime launcher metrics
///
/// Uses atomic operations for thread-safe tracking without locks. Shared
/// through the [`crate::tasks::TaskExecutor`] and logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Task invocations that reached a registered handler
    pub tasks_invoked: AtomicU64,

    /// Task invocations that ended in an error or panic
    pub tasks_failed: AtomicU64,

    /// Invocations of kinds nobody registered
    pub tasks_unregistered: AtomicU64,

    /// Refresh requests dropped because one was already running
    pub refreshes_skipped: AtomicU64,

    /// Snapshot refreshes that completed
    pub refreshes_completed: AtomicU64,

    /// Archive bytes received
    pub bytes_downloaded: AtomicU64,

    /// Events delivered to foreground handlers
    pub events_dispatched: AtomicU64,

    /// Total time spent downloading, in milliseconds
    pub total_download_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_invoked: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_unregistered: AtomicU64::new(0),
            refreshes_skipped: AtomicU64::new(0),
            refreshes_completed: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            total_download_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_task_invoked(&self) {
        self.tasks_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_unregistered(&self) {
        self.tasks_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_skipped(&self) {
        self.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_completed(&self) {
        self.refreshes_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished download
    pub fn record_download(&self, bytes: u64, duration: Duration) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.total_download_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average download throughput in bytes per second
    pub fn download_rate(&self) -> f64 {
        let bytes = self.bytes_downloaded.load(Ordering::Relaxed);
        let ms = self.total_download_time_ms.load(Ordering::Relaxed);
        if ms > 0 {
            bytes as f64 * 1000.0 / ms as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Launcher Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Tasks: {} invoked, {} failed, {} unregistered",
            self.tasks_invoked.load(Ordering::Relaxed),
            self.tasks_failed.load(Ordering::Relaxed),
            self.tasks_unregistered.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Refreshes: {} completed, {} skipped",
            self.refreshes_completed.load(Ordering::Relaxed),
            self.refreshes_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Downloads: {} bytes ({:.0} B/s)",
            self.bytes_downloaded.load(Ordering::Relaxed),
            self.download_rate()
        );
        tracing::info!(
            "Events dispatched: {}",
            self.events_dispatched.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
