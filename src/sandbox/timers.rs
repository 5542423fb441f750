//! Timer/interval registry of one unit.
//!
//! Each handle is a tokio task that sleeps and then wakes the unit's runtime
//! thread with the handle id; the callback itself stays with the registry and
//! is run on the runtime thread. Cancelling a handle aborts its task.

use std::collections::HashMap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Handle returned to scripts by `setTimeout` / `setInterval`.
pub type TimerId = u32;

/// Shortest accepted interval period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct Entry<C> {
    callback: C,
    task: JoinHandle<()>,
}

/// Outstanding timeouts and intervals, keyed by handle.
pub struct TimerRegistry<C> {
    runtime: Handle,
    next_id: TimerId,
    timeouts: HashMap<TimerId, Entry<C>>,
    intervals: HashMap<TimerId, Entry<C>>,
}

impl<C> TimerRegistry<C> {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: 1,
            timeouts: HashMap::new(),
            intervals: HashMap::new(),
        }
    }

    fn allocate(&mut self) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Schedule a one-shot callback; `wake` is called with the handle when it is due.
    pub fn set_timeout<W>(&mut self, callback: C, delay: Duration, wake: W) -> TimerId
    where
        W: Fn(TimerId) + Send + 'static,
    {
        let id = self.allocate();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            wake(id);
        });
        self.timeouts.insert(id, Entry { callback, task });
        tracing::trace!(timer_id = id, delay_ms = delay.as_millis() as u64, "timeout scheduled");
        id
    }

    /// Schedule a repeating callback; `wake` is called with the handle on every tick.
    pub fn set_interval<W>(&mut self, callback: C, period: Duration, wake: W) -> TimerId
    where
        W: Fn(TimerId) + Send + 'static,
    {
        let id = self.allocate();
        let period = period.max(MIN_INTERVAL);
        let task = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                wake(id);
            }
        });
        self.intervals.insert(id, Entry { callback, task });
        tracing::trace!(timer_id = id, period_ms = period.as_millis() as u64, "interval scheduled");
        id
    }

    /// Remove a fired timeout and hand back its callback.
    ///
    /// Returns `None` if the handle was cleared (or is an interval).
    pub fn take_fired_timeout(&mut self, id: TimerId) -> Option<C> {
        self.timeouts.remove(&id).map(|entry| entry.callback)
    }

    pub fn is_interval(&self, id: TimerId) -> bool {
        self.intervals.contains_key(&id)
    }

    /// Cancel a timeout; unknown handles are ignored.
    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        match self.timeouts.remove(&id) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel an interval; unknown handles are ignored.
    pub fn clear_interval(&mut self, id: TimerId) -> bool {
        match self.intervals.remove(&id) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn outstanding_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    pub fn outstanding_intervals(&self) -> usize {
        self.intervals.len()
    }

    pub fn outstanding(&self) -> usize {
        self.timeouts.len() + self.intervals.len()
    }

    /// Cancel every outstanding handle. Returns `(timeouts, intervals)` cancelled.
    pub fn drain(&mut self) -> (usize, usize) {
        let timeouts = self.timeouts.len();
        let intervals = self.intervals.len();
        for (_, entry) in self.timeouts.drain().chain(self.intervals.drain()) {
            entry.task.abort();
        }
        (timeouts, intervals)
    }
}

impl<C: Clone> TimerRegistry<C> {
    /// Callback of a live interval, cloned so it can run while the registry is borrowed again.
    pub fn interval_callback(&self, id: TimerId) -> Option<C> {
        self.intervals.get(&id).map(|entry| entry.callback.clone())
    }
}

impl<C> Drop for TimerRegistry<C> {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Delay argument of `setTimeout`: negative or non-numeric values mean "now".
pub fn delay_from_millis(value: Option<f64>) -> Duration {
    match value {
        Some(ms) if ms.is_finite() && ms > 0.0 => Duration::from_secs_f64(ms / 1000.0),
        _ => Duration::ZERO,
    }
}
