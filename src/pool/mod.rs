//! Pre-warmed pool of engine and event-loop pairs.
//!
//! Each slot owns one engine and the loop that serializes access to it.
//! `run` claims the first free slot, drives the caller's work as the loop's
//! first task, drains residual registrations, and frees the slot on every
//! exit path. When all slots are busy the work runs on a one-off pair
//! instead; ephemeral pairs skip the drain, so trailing async work on them
//! is deliberately dropped when the loop returns.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace};

use crate::engine::ScriptEngine;
use crate::error::Result;
use crate::event_loop::EventLoop;

/// Produces a fresh engine+loop pair, for pre-warming and for the
/// ephemeral fallback.
pub type EngineFactory = Box<dyn Fn() -> (Arc<dyn ScriptEngine>, Arc<EventLoop>) + Send + Sync>;

struct PoolItem {
    busy: Mutex<bool>,
    engine: Arc<dyn ScriptEngine>,
    event_loop: Arc<EventLoop>,
}

/// Fixed-size pool of engine+loop slots with an ephemeral fallback.
pub struct VmPool {
    factory: EngineFactory,
    items: RwLock<Vec<Arc<PoolItem>>>,
}

impl VmPool {
    /// Create a pool with `size` pre-warmed slots. A size of zero makes
    /// every run ephemeral.
    pub fn new(size: usize, factory: EngineFactory) -> Self {
        let mut items = Vec::with_capacity(size);
        for _ in 0..size {
            let (engine, event_loop) = factory();
            items.push(Arc::new(PoolItem {
                busy: Mutex::new(false),
                engine,
                event_loop,
            }));
        }

        Self {
            factory,
            items: RwLock::new(items),
        }
    }

    /// Number of pre-warmed slots.
    pub fn size(&self) -> usize {
        self.items.read().unwrap().len()
    }

    /// Execute `work` with an engine borrowed from the pool, or with a
    /// one-off engine when every slot is busy. The claimed slot is freed on
    /// all exit paths.
    pub fn run<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce(&Arc<dyn ScriptEngine>) -> Result<()> + Send + 'static,
    {
        let free_item = {
            let items = self.items.read().unwrap();
            let mut claimed = None;
            for item in items.iter() {
                let mut busy = item.busy.lock().unwrap();
                if *busy {
                    continue;
                }
                *busy = true;
                drop(busy);
                claimed = Some(Arc::clone(item));
                break;
            }
            claimed
        };

        let Some(item) = free_item else {
            // All slots busy: one-off pair, used once and dropped. No drain;
            // trailing registrations die with the pair.
            debug!("vm pool exhausted, running on ephemeral engine");
            let (engine, event_loop) = (self.factory)();
            return event_loop.start(Some(Box::new(move || work(&engine))));
        };

        trace!("vm pool slot claimed");

        let engine = Arc::clone(&item.engine);
        let loop_result = item.event_loop.start(Some(Box::new(move || work(&engine))));

        // Drain residual registrations (e.g. interval timers spawned by the
        // work) before the slot can be reused.
        let drain_result = item.event_loop.wait_on_registered();

        *item.busy.lock().unwrap() = false;

        drain_result?;
        loop_result
    }
}
