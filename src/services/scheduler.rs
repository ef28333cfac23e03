//! Periodic driver for the monitor
//!
//! Owns the tick task. `start` is a no-op while running; `stop` cancels the
//! task and waits out any tick in flight, so no tick fires after it returns.

use crate::infra::config::Config;
use crate::services::monitor::SharedMonitor;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Lifecycle of the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Starting => "starting",
            LoopState::Running => "running",
        }
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler handle owning the periodic tick task
pub struct MonitorLoop {
    monitor: SharedMonitor,
    period: Duration,
    state: LoopState,
    ticker: Option<Ticker>,
}

impl MonitorLoop {
    pub fn new(monitor: SharedMonitor, period: Duration) -> Self {
        Self { monitor, period: period.max(Duration::from_millis(1)), state: LoopState::Idle, ticker: None }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    /// True while a tick task exists
    pub fn has_pending_ticks(&self) -> bool {
        self.ticker.is_some()
    }

    /// Begin periodic ticking; returns false if already started
    ///
    /// Must be called from within a tokio runtime. The first tick fires one
    /// period after start.
    pub fn start(&mut self) -> bool {
        if self.state != LoopState::Idle {
            debug!(state = self.state.as_str(), "monitor_loop_already_started");
            return false;
        }
        self.state = LoopState::Starting;
        self.monitor.lock().begin(Utc::now());

        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_ticks(self.monitor.clone(), self.period, cancelled.clone()));
        self.ticker = Some(Ticker { handle, cancelled });
        self.state = LoopState::Running;

        info!(period_ms = self.period.as_millis() as u64, "monitor_loop_started");
        true
    }

    /// Cancel ticking and return to Idle; safe to call repeatedly
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            self.state = LoopState::Idle;
            return;
        };
        ticker.cancelled.store(true, Ordering::SeqCst);
        ticker.handle.abort();
        // Wait for a tick that already holds the lock
        drop(self.monitor.lock());
        self.state = LoopState::Idle;
        info!("monitor_loop_stopped");
    }
}

impl Drop for MonitorLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the loop at the configured period and start it at once
///
/// Location authorization is not consulted; it gates only the live feed.
/// Must be called from within a tokio runtime.
pub fn start_monitor_loop(monitor: SharedMonitor, config: &Config) -> MonitorLoop {
    let mut monitor_loop = MonitorLoop::new(monitor, config.tick_interval());
    monitor_loop.start();
    monitor_loop
}

async fn run_ticks(monitor: SharedMonitor, period: Duration, cancelled: Arc<AtomicBool>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let mut guard = monitor.lock();
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        guard.tick(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Metrics;
    use crate::services::monitor::{Monitor, MonitorSettings};
    use crate::services::status::LogAlertSink;

    fn shared_monitor() -> (SharedMonitor, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let monitor = Monitor::new(MonitorSettings::default(), Arc::new(LogAlertSink), metrics.clone());
        (monitor.into_shared(), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_period() {
        let (monitor, metrics) = shared_monitor();
        let mut monitor_loop = MonitorLoop::new(monitor.clone(), Duration::from_secs(7));

        assert!(monitor_loop.start());
        assert_eq!(monitor_loop.state(), LoopState::Running);
        assert!(monitor.lock().started_at().is_some());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(metrics.ticks_total(), 2);

        monitor_loop.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_noop_when_running() {
        let (monitor, metrics) = shared_monitor();
        let mut monitor_loop = MonitorLoop::new(monitor, Duration::from_secs(7));

        assert!(monitor_loop.start());
        assert!(!monitor_loop.start());

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(metrics.ticks_total(), 1);
        monitor_loop.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_leaves_idle_without_ticks() {
        let (monitor, metrics) = shared_monitor();
        let mut monitor_loop = MonitorLoop::new(monitor, Duration::from_secs(7));

        monitor_loop.start();
        tokio::time::sleep(Duration::from_secs(8)).await;
        let ticks = metrics.ticks_total();

        monitor_loop.stop();
        monitor_loop.stop();
        assert_eq!(monitor_loop.state(), LoopState::Idle);
        assert!(!monitor_loop.has_pending_ticks());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(metrics.ticks_total(), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (monitor, metrics) = shared_monitor();
        let mut monitor_loop = MonitorLoop::new(monitor, Duration::from_secs(7));

        monitor_loop.start();
        monitor_loop.stop();
        assert!(monitor_loop.start());

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(metrics.ticks_total(), 1);
    }

    #[test]
    fn test_stop_without_start() {
        let (monitor, _) = shared_monitor();
        let mut monitor_loop = MonitorLoop::new(monitor, Duration::from_secs(7));
        monitor_loop.stop();
        assert_eq!(monitor_loop.state(), LoopState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_config_ticks_without_authorization() {
        let config = Config::default();
        assert!(!config.authorization().is_authorized());

        let metrics = Arc::new(Metrics::new());
        let monitor = Monitor::from_config(&config, Arc::new(LogAlertSink), metrics.clone()).unwrap().into_shared();
        let mut monitor_loop = start_monitor_loop(monitor.clone(), &config);
        assert!(monitor_loop.is_running());

        tokio::time::sleep(config.tick_interval() + Duration::from_secs(1)).await;
        assert_eq!(metrics.ticks_total(), 1);
        assert!(monitor.lock().snapshot().iter().all(|e| e.position.is_some()));
        monitor_loop.stop();
    }
}
