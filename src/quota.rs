//! Storage quota monitor: tracks usage against soft/hard
//! limits, escalates severity events, and adapts its own check cadence.
//!
//! The listener list is kept as a copy-on-write `arc-swap` vector rather
//! than a channel, since listeners here are long-lived callbacks, not
//! one-shot query guards, and invoking them must not hold the history lock.

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Soft/hard storage budget and the monitor's adaptive check cadence.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    /// Usage fraction (of `hard_limit_bytes`) at which a `Warning` event
    /// fires. Default is a 15% safety margin below the limit.
    pub warning_fraction: f64,
    /// Usage fraction at which a `Critical` event fires.
    pub critical_fraction: f64,
    /// Usage fraction at which an `Emergency` event fires, independent of
    /// `hard_limit_bytes` itself being reached.
    pub emergency_fraction: f64,
    /// Hard ceiling in bytes; reaching or exceeding it always fires
    /// `Emergency`, regardless of `emergency_fraction`.
    pub hard_limit_bytes: u64,
    /// Shortest interval between checks, used near the limit.
    pub min_check_interval: Duration,
    /// Longest interval between checks, used when usage is low.
    pub max_check_interval: Duration,
    /// Number of `(timestamp, used_bytes)` samples kept for trend estimation.
    pub history_capacity: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            warning_fraction: 0.85,
            critical_fraction: 0.9,
            emergency_fraction: 0.95,
            hard_limit_bytes: 10 * 1024 * 1024 * 1024,
            min_check_interval: Duration::from_millis(10),
            max_check_interval: Duration::from_millis(1000),
            history_capacity: 50,
        }
    }
}

impl QuotaConfig {
    /// Builder-style constructor.
    #[must_use]
    pub fn new(hard_limit_bytes: u64) -> Self {
        Self {
            hard_limit_bytes,
            ..Default::default()
        }
    }

    /// Overrides the warning/critical/emergency fractions.
    #[must_use]
    pub fn with_fractions(mut self, warning: f64, critical: f64, emergency: f64) -> Self {
        self.warning_fraction = warning;
        self.critical_fraction = critical;
        self.emergency_fraction = emergency;
        self
    }
}

/// Escalation level of a [`QuotaEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Usage crossed `warning_fraction`.
    Warning,
    /// Usage crossed `critical_fraction`.
    Critical,
    /// Usage crossed `emergency_fraction`, or reached `hard_limit_bytes`.
    Emergency,
}

/// A quota threshold crossing, passed to every subscribed listener.
#[derive(Debug, Clone)]
pub struct QuotaEvent {
    /// Escalation level.
    pub severity: Severity,
    /// Bytes in use at the time of the check.
    pub used_bytes: u64,
    /// Configured hard limit.
    pub limit_bytes: u64,
    /// Linear-regression estimate of time until `hard_limit_bytes` is
    /// reached at the current growth rate, if usage is trending upward.
    pub estimated_time_to_full: Option<Duration>,
}

type Listener = Arc<dyn Fn(&QuotaEvent) + Send + Sync>;

/// Tracks storage usage over time, firing severity events to subscribers
/// and shortening its own check interval as usage approaches the limit.
pub struct QuotaMonitor {
    config: QuotaConfig,
    listeners: ArcSwap<Vec<Listener>>,
    history: RwLock<VecDeque<(u64, u64)>>,
    last_severity: RwLock<Option<Severity>>,
    current_interval_ms: AtomicU64,
}

impl QuotaMonitor {
    /// Creates a monitor with the given config.
    #[must_use]
    pub fn new(config: QuotaConfig) -> Self {
        let initial = config.max_check_interval.as_millis() as u64;
        Self {
            config,
            listeners: ArcSwap::from_pointee(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            last_severity: RwLock::new(None),
            current_interval_ms: AtomicU64::new(initial),
        }
    }

    /// Subscribes a listener, invoked on every severity event (including
    /// repeats, so callers that only want edges should track `severity`
    /// themselves). Returns immediately; does not call `listener` for the
    /// current state.
    pub fn on_event(&self, listener: impl Fn(&QuotaEvent) + Send + Sync + 'static) {
        let boxed: Listener = Arc::new(listener);
        self.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push(Arc::clone(&boxed));
            next
        });
    }

    /// How long the caller should wait before calling [`Self::check`] again.
    #[must_use]
    pub fn next_check_interval(&self) -> Duration {
        Duration::from_millis(self.current_interval_ms.load(Ordering::Relaxed))
    }

    /// Records a usage sample, possibly firing a severity event to
    /// subscribers, and adapts the next check interval.
    pub fn check(&self, used_bytes: u64, now_ms: u64) -> Option<QuotaEvent> {
        {
            let mut history = self.history.write();
            if history.len() >= self.config.history_capacity {
                history.pop_front();
            }
            history.push_back((now_ms, used_bytes));
        }

        let ratio = used_bytes as f64 / self.config.hard_limit_bytes.max(1) as f64;
        let severity = if used_bytes >= self.config.hard_limit_bytes || ratio >= self.config.emergency_fraction {
            Some(Severity::Emergency)
        } else if ratio >= self.config.critical_fraction {
            Some(Severity::Critical)
        } else if ratio >= self.config.warning_fraction {
            Some(Severity::Warning)
        } else {
            None
        };

        self.adapt_interval(ratio);
        *self.last_severity.write() = severity;

        let severity = severity?;
        let event = QuotaEvent {
            severity,
            used_bytes,
            limit_bytes: self.config.hard_limit_bytes,
            estimated_time_to_full: self.estimate_time_to_full(),
        };

        for listener in self.listeners.load().iter() {
            listener(&event);
        }
        Some(event)
    }

    fn adapt_interval(&self, ratio: f64) {
        let min = self.config.min_check_interval.as_millis() as u64;
        let max = self.config.max_check_interval.as_millis() as u64;
        let stepped = if ratio > 0.9 {
            10
        } else if ratio > 0.8 {
            50
        } else if ratio > 0.7 {
            100
        } else if ratio > 0.5 {
            500
        } else {
            1000
        };
        self.current_interval_ms
            .store(stepped.clamp(min, max), Ordering::Relaxed);
    }

    /// Linear-regression estimate of time until `hard_limit_bytes` is hit,
    /// based on the recorded `(timestamp_ms, used_bytes)` history. Returns
    /// `None` if there's too little history or usage isn't trending upward.
    #[must_use]
    pub fn estimate_time_to_full(&self) -> Option<Duration> {
        let history = self.history.read();
        if history.len() < 5 {
            return None;
        }

        let n = history.len() as f64;
        let t0 = history.front().unwrap().0 as f64;
        let points: Vec<(f64, f64)> = history.iter().map(|&(t, u)| (t as f64 - t0, u as f64)).collect();

        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let mut cov = 0.0;
        let mut var = 0.0;
        for (x, y) in &points {
            cov += (x - mean_x) * (y - mean_y);
            var += (x - mean_x).powi(2);
        }

        if var <= f64::EPSILON {
            return None;
        }

        let slope = cov / var; // bytes per ms
        if slope <= 0.0 {
            return None;
        }

        let intercept = mean_y - slope * mean_x;
        let last_x = points.last().unwrap().0;
        let current_used = slope * last_x + intercept;
        let remaining = self.config.hard_limit_bytes as f64 - current_used;
        if remaining <= 0.0 {
            return Some(Duration::ZERO);
        }

        Some(Duration::from_millis((remaining / slope) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn below_warning_fires_nothing() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        assert!(monitor.check(100, 0).is_none());
    }

    #[test]
    fn crossing_warning_fires_event() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        let event = monitor.check(850, 0).unwrap();
        assert_eq!(event.severity, Severity::Warning);
    }

    #[test]
    fn crossing_hard_limit_fires_emergency() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        let event = monitor.check(1000, 0).unwrap();
        assert_eq!(event.severity, Severity::Emergency);
    }

    #[test]
    fn listeners_are_invoked() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        let seen: Arc<Mutex<Vec<Severity>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        monitor.on_event(move |event| recorder.lock().unwrap().push(event.severity));
        monitor.check(920, 0);
        assert_eq!(seen.lock().unwrap().as_slice(), [Severity::Critical]);
    }

    #[test]
    fn interval_shrinks_as_usage_grows() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        monitor.check(0, 0);
        let low_interval = monitor.next_check_interval();
        monitor.check(950, 1);
        let high_interval = monitor.next_check_interval();
        assert!(high_interval < low_interval);
    }

    #[test]
    fn estimates_time_to_full_from_linear_trend() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        monitor.check(100, 0);
        monitor.check(200, 1000);
        monitor.check(300, 2000);
        monitor.check(400, 3000);
        monitor.check(500, 4000);
        let estimate = monitor.estimate_time_to_full().unwrap();
        // Growing 100 bytes/sec from 500, needs 500 more => ~5000ms.
        assert!((4_000..=6_000).contains(&estimate.as_millis()));
    }

    #[test]
    fn too_few_samples_has_no_estimate() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        monitor.check(100, 0);
        monitor.check(200, 1000);
        monitor.check(300, 2000);
        assert!(monitor.estimate_time_to_full().is_none());
    }

    #[test]
    fn flat_usage_has_no_estimate() {
        let monitor = QuotaMonitor::new(QuotaConfig::new(1000));
        monitor.check(100, 0);
        monitor.check(100, 1000);
        monitor.check(100, 2000);
        monitor.check(100, 3000);
        monitor.check(100, 4000);
        assert!(monitor.estimate_time_to_full().is_none());
    }
}
