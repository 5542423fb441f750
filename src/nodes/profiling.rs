//! Invocation duration counters and the rate-limited status redraw they drive.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::core::event_bus::{NodeStatus, UnitEvents};

/// Milliseconds, truncated to two decimals.
pub fn duration_millis(elapsed: Duration) -> f64 {
    (elapsed.as_nanos() / 10_000) as f64 / 100.0
}

/// Accumulated durations of a unit's synchronous invocations.
///
/// `max` holds truncated milliseconds; `total` sums the untruncated ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProfilingStats {
    pub max: f64,
    pub total: f64,
    pub count: u64,
}

impl ProfilingStats {
    pub fn record(&mut self, elapsed: Duration) {
        let millis = duration_millis(elapsed);
        if millis > self.max {
            self.max = millis;
        }
        self.total += elapsed.as_nanos() as f64 / 1_000_000.0;
        self.count += 1;
    }

    pub fn status_text(&self) -> String {
        let total = (self.total * 100.0).round() / 100.0;
        format!("max: {}, total: {}, count: {}", self.max, total, self.count)
    }
}

#[derive(Default)]
struct ThrottleState {
    pending: Option<NodeStatus>,
    running: bool,
    task: Option<JoinHandle<()>>,
}

/// Collapses bursts of status updates into at most one redraw per interval.
///
/// The first update is drawn at once; later ones are parked and drawn by a
/// redraw loop that exits as soon as an interval passes without a new update.
pub struct StatusThrottle {
    interval: Duration,
    events: UnitEvents,
    state: Arc<Mutex<ThrottleState>>,
    runtime: Handle,
}

impl StatusThrottle {
    pub fn new(interval: Duration, events: UnitEvents, runtime: Handle) -> Self {
        Self {
            interval,
            events,
            state: Arc::new(Mutex::new(ThrottleState::default())),
            runtime,
        }
    }

    pub fn update(&self, status: NodeStatus) {
        let mut state = self.state.lock();
        if state.running {
            state.pending = Some(status);
            return;
        }

        self.events.status(Some(status));
        state.running = true;

        let shared = self.state.clone();
        let events = self.events.clone();
        let interval = self.interval;
        state.task = Some(self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let next = {
                    let mut state = shared.lock();
                    match state.pending.take() {
                        Some(status) => status,
                        None => {
                            state.running = false;
                            break;
                        }
                    }
                };
                events.status(Some(next));
            }
        }));
    }

    /// Stop the redraw loop, discarding any parked update.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.pending = None;
        state.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

impl Drop for StatusThrottle {
    fn drop(&mut self) {
        self.stop();
    }
}
