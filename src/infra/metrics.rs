//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the tick loop, the position feed and the reporter never
//! contend on a mutex. Reporting swaps the per-interval counters to zero.
//!
//! NOTE: Relaxed ordering throughout. These counters are statistics only and
//! must not drive monitor decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Tick duration bounds (microseconds); a tick walks every entity once
const TICK_BOUNDS_US: [u64; 8] = [50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Deviation bounds (meters) sampled when an off-route alert is raised
const DEVIATION_BOUNDS_M: [u64; 7] = [100, 200, 400, 800, 1_600, 3_200, 6_400];

/// Fixed-bound histogram with one overflow bucket, reset on every report
struct Histogram {
    bounds: &'static [u64],
    /// `bounds.len() + 1` counters; the last one holds values above every bound
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

/// Values drained from a `Histogram`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub max: u64,
    pub buckets: Vec<u64>,
    bounds: &'static [u64],
}

impl Histogram {
    fn new(bounds: &'static [u64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    fn record(&self, value: u64) {
        let index = self.bounds.partition_point(|&bound| bound < value);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    fn take(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count.swap(0, Ordering::Relaxed),
            sum: self.sum.swap(0, Ordering::Relaxed),
            max: self.max.swap(0, Ordering::Relaxed),
            buckets: self.buckets.iter().map(|b| b.swap(0, Ordering::Relaxed)).collect(),
            bounds: self.bounds,
        }
    }
}

impl HistogramSnapshot {
    pub fn mean(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }

    /// Upper bound of the bucket holding the `q` quantile
    ///
    /// The overflow bucket reports the observed maximum. Zero when empty.
    pub fn quantile(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((self.count as f64 * q).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &n) in self.buckets.iter().enumerate() {
            cumulative += n;
            if cumulative >= target {
                return self.bounds.get(i).copied().unwrap_or(self.max);
            }
        }
        self.max
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total monitoring ticks (monotonic)
    ticks_total: AtomicU64,
    /// Tick durations in microseconds (reset on report)
    tick_latency: Histogram,
    /// Deviation in meters at each raised alert (reset on report)
    alert_deviation: Histogram,
    /// Live fixes applied to an entity (monotonic)
    fixes_applied: AtomicU64,
    /// Live fixes ignored: invalid, unknown entity, or not authorized (monotonic)
    fixes_ignored: AtomicU64,
    /// Live fixes dropped because the feed channel was full (monotonic)
    fixes_dropped: AtomicU64,
    /// Status transitions of any kind (monotonic)
    status_transitions: AtomicU64,
    /// Off-route alerts delivered to the sink (monotonic)
    alerts_sent: AtomicU64,
    /// Off-route alerts the sink rejected (monotonic)
    alerts_failed: AtomicU64,
    /// Routes that fell back to a straight line (monotonic)
    routing_fallbacks: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            tick_latency: Histogram::new(&TICK_BOUNDS_US),
            alert_deviation: Histogram::new(&DEVIATION_BOUNDS_M),
            fixes_applied: AtomicU64::new(0),
            fixes_ignored: AtomicU64::new(0),
            fixes_dropped: AtomicU64::new(0),
            status_transitions: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            routing_fallbacks: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed monitoring tick with its duration
    #[inline]
    pub fn record_tick(&self, latency_us: u64) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.tick_latency.record(latency_us);
    }

    /// Record the deviation of an entity that just left its corridor
    pub fn record_off_route_deviation(&self, deviation_m: f64) {
        if deviation_m.is_finite() && deviation_m >= 0.0 {
            self.alert_deviation.record(deviation_m.round() as u64);
        }
    }

    #[inline]
    pub fn record_fix_applied(&self) {
        self.fixes_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_ignored(&self) {
        self.fixes_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_dropped(&self) {
        self.fixes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_status_transition(&self) {
        self.status_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_sent(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_failed(&self) {
        self.alerts_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_routing_fallback(&self) {
        self.routing_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alerts_failed(&self) -> u64 {
        self.alerts_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_applied(&self) -> u64 {
        self.fixes_applied.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_ignored(&self) -> u64 {
        self.fixes_ignored.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn routing_fallbacks(&self) -> u64 {
        self.routing_fallbacks.load(Ordering::Relaxed)
    }

    /// Snapshot counters and reset the per-interval histograms
    ///
    /// Entity counts are owned by the monitor and passed in by the caller.
    pub fn report(&self, counts: StatusCounts) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let ticks = self.tick_latency.take();
        let ticks_per_min = if elapsed_secs > 0.0 { ticks.count as f64 * 60.0 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_min,
            ticks,
            alert_deviation: self.alert_deviation.take(),
            fixes_applied: self.fixes_applied.load(Ordering::Relaxed),
            fixes_ignored: self.fixes_ignored.load(Ordering::Relaxed),
            fixes_dropped: self.fixes_dropped.load(Ordering::Relaxed),
            status_transitions: self.status_transitions.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            routing_fallbacks: self.routing_fallbacks.load(Ordering::Relaxed),
            counts,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity counts by status at report time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub on_route: usize,
    pub off_route: usize,
    pub unknown: usize,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_min: f64,
    /// Tick durations (µs) since the previous report
    pub ticks: HistogramSnapshot,
    /// Deviations (m) of alerts raised since the previous report
    pub alert_deviation: HistogramSnapshot,
    pub fixes_applied: u64,
    pub fixes_ignored: u64,
    pub fixes_dropped: u64,
    pub status_transitions: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub routing_fallbacks: u64,
    pub counts: StatusCounts,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_min = format!("{:.1}", self.ticks_per_min),
            tick_avg_us = %self.ticks.mean(),
            tick_max_us = %self.ticks.max,
            tick_p99_us = %self.ticks.quantile(0.99),
            entities = %self.counts.total,
            on_route = %self.counts.on_route,
            off_route = %self.counts.off_route,
            unknown = %self.counts.unknown,
            fixes_applied = %self.fixes_applied,
            fixes_ignored = %self.fixes_ignored,
            fixes_dropped = %self.fixes_dropped,
            alerts_sent = %self.alerts_sent,
            alerts_failed = %self.alerts_failed,
            alert_deviation_p50_m = %self.alert_deviation.quantile(0.5),
            alert_deviation_max_m = %self.alert_deviation.max,
            routing_fallbacks = %self.routing_fallbacks,
            "metrics"
        );
    }
}
