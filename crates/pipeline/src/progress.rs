use std::collections::HashMap;
use std::time::{Duration, Instant};
use parking_lot::Mutex;

use crate::job::JobKey;

/// Last emitted progress point of one job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub bytes: u64,
    pub at: Instant,
    /// Bytes per second computed when this sample was emitted
    pub speed: f64,
}

/// A progress report that passed the throttle and should be shown to the owner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub current: u64,
    /// Zero when the sink does not know the final size
    pub total: u64,
    /// 0.0..=100.0; always 0.0 when `total` is zero
    pub percentage: f64,
    pub speed: f64,
    /// Present only when both the total and a positive speed are known
    pub eta: Option<Duration>,
    /// This report is the one that reached 100%
    pub is_final: bool,
}

/// Throttle state for all running jobs.
///
/// Decisions depend only on the state and the arguments, `now` included,
/// so callers can drive it with synthetic clocks.
#[derive(Debug)]
pub struct ProgressState {
    interval: Duration,
    samples: HashMap<JobKey, ProgressSample>,
}

impl ProgressState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            samples: HashMap::new(),
        }
    }

    /// Record a byte count and decide whether it should be reported
    pub fn observe(&mut self, key: JobKey, current: u64, total: u64, now: Instant) -> Option<ProgressUpdate> {
        let previous = self.samples.get(&key).copied();
        let complete = total > 0 && current >= total;
        let just_completed = complete && previous.map_or(true, |p| p.bytes < current);

        if let Some(prev) = previous {
            if !just_completed && now.saturating_duration_since(prev.at) < self.interval {
                return None;
            }
        }

        let speed = previous.map_or(0.0, |prev| speed_between(&prev, current, now));
        self.samples.insert(key, ProgressSample { bytes: current, at: now, speed });

        Some(ProgressUpdate {
            current,
            total,
            percentage: percentage(current, total),
            speed,
            eta: eta(current, total, speed),
            is_final: just_completed,
        })
    }

    pub fn sample(&self, key: &JobKey) -> Option<&ProgressSample> {
        self.samples.get(key)
    }

    /// Forget a job once it terminated
    pub fn discard(&mut self, key: &JobKey) -> Option<ProgressSample> {
        self.samples.remove(key)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Shared tracker used from upload progress callbacks
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(ProgressState::new(interval)),
        }
    }

    pub fn observe(&self, key: JobKey, current: u64, total: u64, now: Instant) -> Option<ProgressUpdate> {
        self.state.lock().observe(key, current, total, now)
    }

    pub fn discard(&self, key: &JobKey) {
        self.state.lock().discard(key);
    }

    pub fn tracked_jobs(&self) -> usize {
        self.state.lock().len()
    }
}

/// Percentage of `total` transferred, 0.0 when the total is unknown
pub fn percentage(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64 * 100.0).min(100.0)
}

fn speed_between(prev: &ProgressSample, current: u64, now: Instant) -> f64 {
    let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
    if elapsed <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(prev.bytes) as f64 / elapsed
}

fn eta(current: u64, total: u64, speed: f64) -> Option<Duration> {
    if total == 0 || !(speed > 0.0) {
        return None;
    }
    let remaining = total.saturating_sub(current) as f64;
    Duration::try_from_secs_f64(remaining / speed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::OwnerId;
    use proptest::prelude::*;

    fn key() -> JobKey {
        JobKey { owner: OwnerId(7), sequence: 3 }
    }

    #[test]
    fn test_first_report_is_emitted_without_speed() {
        let mut state = ProgressState::new(Duration::from_secs(2));
        let update = state.observe(key(), 100, 1000, Instant::now()).unwrap();
        assert_eq!(update.speed, 0.0);
        assert_eq!(update.eta, None);
        assert_eq!(update.percentage, 10.0);
        assert!(!update.is_final);
    }

    #[test]
    fn test_reports_inside_interval_are_suppressed() {
        let mut state = ProgressState::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(state.observe(key(), 0, 1000, t0).is_some());
        assert!(state.observe(key(), 100, 1000, t0 + Duration::from_millis(1999)).is_none());

        let update = state.observe(key(), 400, 1000, t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(update.speed, 200.0);
        assert_eq!(update.eta, Some(Duration::from_secs(3)));

        // Suppressed reports leave the last emitted sample untouched
        let sample = state.sample(&key()).unwrap();
        assert_eq!(sample.bytes, 400);
        assert_eq!(sample.at, t0 + Duration::from_secs(2));
        assert_eq!(sample.speed, 200.0);
    }

    #[test]
    fn test_simulated_upload_throttling() {
        let mut state = ProgressState::new(Duration::from_secs(2));
        let t0 = Instant::now();
        let total = 100 * 1024;
        let mut regular = 0;
        let mut finals = 0;

        for i in 1..=100u64 {
            let now = t0 + Duration::from_millis(100 * i);
            if let Some(update) = state.observe(key(), i * 1024, total, now) {
                if update.is_final {
                    finals += 1;
                    assert_eq!(update.percentage, 100.0);
                } else {
                    regular += 1;
                }
            }
        }

        assert!(regular <= 6, "too many regular updates: {}", regular);
        assert_eq!(finals, 1);
    }

    #[test]
    fn test_repeated_completion_is_throttled() {
        let mut state = ProgressState::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(state.observe(key(), 10, 10, t0).unwrap().is_final);
        assert!(state.observe(key(), 10, 10, t0 + Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_unknown_total_reports_zero_percent() {
        let mut state = ProgressState::new(Duration::from_secs(2));
        let t0 = Instant::now();
        state.observe(key(), 0, 0, t0);
        let update = state.observe(key(), 5000, 0, t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(update.percentage, 0.0);
        assert_eq!(update.speed, 1000.0);
        assert_eq!(update.eta, None);
        assert!(!update.is_final);
    }

    #[test]
    fn test_same_instant_speed_is_zero() {
        let sample = ProgressSample { bytes: 0, at: Instant::now(), speed: 0.0 };
        assert_eq!(speed_between(&sample, 1_000_000, sample.at), 0.0);
    }

    #[test]
    fn test_discard_drops_state() {
        let tracker = ProgressTracker::new(Duration::from_secs(2));
        tracker.observe(key(), 1, 2, Instant::now());
        assert_eq!(tracker.tracked_jobs(), 1);
        tracker.discard(&key());
        assert_eq!(tracker.tracked_jobs(), 0);
    }

    proptest! {
        #[test]
        fn test_percentage_is_bounded(current in any::<u64>(), total in any::<u64>()) {
            let pct = percentage(current, total);
            prop_assert!(pct.is_finite());
            prop_assert!((0.0..=100.0).contains(&pct));
            if total == 0 {
                prop_assert_eq!(pct, 0.0);
            }
        }

        #[test]
        fn test_eta_never_infinite(current in 0u64..1 << 40, total in 0u64..1 << 40, speed in 0.0f64..1e9) {
            if let Some(eta) = eta(current, total, speed) {
                prop_assert!(speed > 0.0);
                prop_assert!(total > 0);
                prop_assert!(eta.as_secs_f64().is_finite());
            }
        }
    }
}
