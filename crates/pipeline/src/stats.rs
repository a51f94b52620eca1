use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use serde::Serialize;

/// Lifetime counters of a pool
#[derive(Debug)]
pub struct Statistics {
    started: Instant,
    processed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    bytes: AtomicU64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, bytes: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self, queue_depth: usize, active_count: usize) -> StatsSnapshot {
        let uptime = self.uptime();
        let processed = self.processed.load(Ordering::Relaxed);
        let hours = uptime.as_secs_f64() / 3600.0;
        let average_per_hour = if hours > 0.0 { processed as f64 / hours } else { 0.0 };

        StatsSnapshot {
            queue_depth,
            active_count,
            total_processed: processed,
            total_failed: self.failed.load(Ordering::Relaxed),
            total_cancelled: self.cancelled.load(Ordering::Relaxed),
            total_bytes: self.bytes.load(Ordering::Relaxed),
            uptime_secs: uptime.as_secs(),
            average_per_hour,
        }
    }
}

/// Point-in-time view of the pool, serializable for status output
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub queue_depth: usize,
    pub active_count: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_bytes: u64,
    pub uptime_secs: u64,
    pub average_per_hour: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = Statistics::new();
        stats.record_success(100);
        stats.record_success(50);
        stats.record_failure();
        stats.record_cancelled();

        let snap = stats.snapshot(3, 1);
        assert_eq!(snap.total_processed, 2);
        assert_eq!(snap.total_failed, 1);
        assert_eq!(snap.total_cancelled, 1);
        assert_eq!(snap.total_bytes, 150);
        assert_eq!(snap.queue_depth, 3);
        assert_eq!(snap.active_count, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(Statistics::new().snapshot(0, 0)).unwrap();
        assert_eq!(json["total_processed"], 0);
        assert!(json.get("average_per_hour").is_some());
    }
}
