//! Host-side timer service over an event loop.
//!
//! One-shot and repeating timers reserve cancelable loop registrations, so
//! a loop with live timers stays running until they fire or are cleared.
//! Delays are in milliseconds (the unit host bindings receive from script);
//! negative and non-finite delays clamp to zero. This is the host half of a
//! `setTimeout`/`setInterval` binding; wiring the engine globals is left
//! to the binding layer.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::event_loop::{CancelFn, EventLoop};

/// Callback fired on the loop thread when a timer elapses. Repeating timers
/// invoke it once per period.
pub type TimerCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct TimerState {
    next_id: u64,
    /// Ids of timers that have not fired (one-shot) or been cleared
    /// (intervals). An interval's entry marks the chain as live between
    /// fires.
    active: FxHashSet<u64>,
    /// Pending loop reservations, released by `clear`.
    cancels: FxHashMap<u64, CancelFn>,
}

struct TimersInner {
    event_loop: Arc<EventLoop>,
    state: Mutex<TimerState>,
}

/// Timer service for one event loop. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Timers {
    inner: Arc<TimersInner>,
}

impl Timers {
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            inner: Arc::new(TimersInner {
                event_loop,
                state: Mutex::new(TimerState {
                    next_id: 0,
                    active: FxHashSet::default(),
                    cancels: FxHashMap::default(),
                }),
            }),
        }
    }

    /// Fire `callback` once after `delay_ms` milliseconds. Returns the
    /// timer id for [`clear`](Self::clear).
    pub fn set_timeout(&self, delay_ms: f64, callback: TimerCallback) -> u64 {
        let (enqueue, cancel) = self.inner.event_loop.register_cancelable_callback();

        let id = {
            let mut state = self.inner.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state.active.insert(id);
            state.cancels.insert(id, cancel);
            id
        };

        let inner = Arc::clone(&self.inner);
        let delay = delay_duration(delay_ms);
        thread::spawn(move || {
            thread::sleep(delay);
            // A no-op if the timer was cleared meanwhile.
            enqueue(Box::new(move || {
                inner.state.lock().unwrap().cancels.remove(&id);
                callback()?;
                inner.state.lock().unwrap().active.remove(&id);
                Ok(())
            }));
        });

        id
    }

    /// Fire `callback` every `delay_ms` milliseconds until cleared.
    pub fn set_interval(&self, delay_ms: f64, callback: TimerCallback) -> u64 {
        let id = {
            let mut state = self.inner.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            // Marks the interval live before its first scheduling.
            state.active.insert(id);
            id
        };

        schedule_interval(&self.inner, id, callback, delay_duration(delay_ms));

        id
    }

    /// Stop a pending timer and release its loop reservation. Unknown ids
    /// are ignored.
    pub fn clear(&self, id: u64) {
        let cancel = {
            let mut state = self.inner.state.lock().unwrap();
            state.active.remove(&id);
            state.cancels.remove(&id)
        };

        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

/// Arm one period of an interval: reserve a registration, start the sleep,
/// and record the cancel handle. If the interval was cleared since the
/// previous fire, the fresh reservation is released again instead.
fn schedule_interval(inner: &Arc<TimersInner>, id: u64, callback: TimerCallback, period: Duration) {
    let (enqueue, cancel) = inner.event_loop.register_cancelable_callback();

    let fire_inner = Arc::clone(inner);
    thread::spawn(move || {
        thread::sleep(period);
        enqueue(Box::new(move || {
            let live = {
                let mut state = fire_inner.state.lock().unwrap();
                state.cancels.remove(&id);
                state.active.contains(&id)
            };

            callback()?;

            if live {
                schedule_interval(&fire_inner, id, callback, period);
            }
            Ok(())
        }));
    });

    let mut state = inner.state.lock().unwrap();
    if !state.active.contains(&id) {
        drop(state);
        cancel();
        return;
    }
    state.cancels.insert(id, cancel);
}

fn delay_duration(delay_ms: f64) -> Duration {
    if !delay_ms.is_finite() || delay_ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay_ms / 1000.0).unwrap_or(Duration::MAX)
}
