//! Cooperative event loop bound to a single script engine.
//!
//! The loop serializes every interaction with one engine instance. Host
//! threads reserve *registrations* (outstanding async obligations) and later
//! settle each one exactly once, either by enqueueing a task or by
//! canceling. [`EventLoop::start`] drives the queue on the calling thread
//! and returns precisely when the queue is empty and no registrations
//! remain, or earlier with the first task error, unhandled promise
//! rejection, or cancellation.
//!
//! The loop is single-run: `start` with a first task replaces the queue, so
//! registrations made before `start` are discarded with it.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::engine::{normalize_exception, PromiseHandle, RejectionOperation, ScriptEngine};
use crate::error::{Error, Result};

/// One queued unit of engine-side work. Runs to completion on the loop
/// thread; an `Err` terminates the current run.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Settles a registration by queueing its task. Must be invoked at most
/// once; a second invocation panics. After the paired cancel has run it is
/// a no-op.
pub type EnqueueFn = Box<dyn Fn(Task) + Send + Sync>;

/// Settles a registration without queueing work. No-op after the
/// registration has already settled.
pub type CancelFn = Box<dyn Fn() + Send + Sync>;

/// Wall-clock ceiling for [`EventLoop::wait_on_registered`].
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Progress tick for suspension points, independent of wakeup signals.
const POLL_TICK: Duration = Duration::from_millis(5);

enum Registration {
    Armed,
    Enqueued,
    Canceled,
}

struct LoopState {
    queue: VecDeque<Task>,
    registered: usize,
    pending_rejections: FxHashSet<PromiseHandle>,
    /// One-slot edge-triggered wakeup token; redundant signals coalesce.
    wakeup: bool,
}

struct Shared {
    state: Mutex<LoopState>,
    wakeup_cv: Condvar,
}

impl Shared {
    fn wakeup(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.wakeup {
            state.wakeup = true;
            self.wakeup_cv.notify_all();
        }
    }
}

/// Single-consumer task queue driving one engine instance.
pub struct EventLoop {
    shared: Arc<Shared>,
    cancel: CancelToken,
}

impl EventLoop {
    /// Create a loop for `engine`, installing its promise-rejection
    /// tracker. `cancel` is observed at suspension points only; running
    /// tasks are never interrupted.
    pub fn new(engine: &Arc<dyn ScriptEngine>, cancel: CancelToken) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(LoopState {
                queue: VecDeque::with_capacity(10),
                registered: 0,
                pending_rejections: FxHashSet::default(),
                wakeup: false,
            }),
            wakeup_cv: Condvar::new(),
        });

        let tracked = Arc::clone(&shared);
        engine.set_rejection_tracker(Box::new(move |promise, operation| {
            let mut state = tracked.state.lock().unwrap();
            match operation {
                RejectionOperation::Reject => {
                    state.pending_rejections.insert(promise.clone());
                }
                RejectionOperation::Handle => {
                    state.pending_rejections.remove(promise);
                }
            }
        }));

        Self { shared, cancel }
    }

    /// Reserve one registration. The returned enqueue handle must be
    /// invoked exactly once.
    pub fn register_callback(&self) -> EnqueueFn {
        let (enqueue, _cancel) = self.register_cancelable_callback();
        enqueue
    }

    /// Reserve one registration settled by exactly one of the returned
    /// handles. Whichever handle runs second is a no-op, except invoking
    /// enqueue twice, which panics.
    pub fn register_cancelable_callback(&self) -> (EnqueueFn, CancelFn) {
        self.shared.state.lock().unwrap().registered += 1;

        let registration = Arc::new(Mutex::new(Registration::Armed));

        let enqueue_shared = Arc::clone(&self.shared);
        let enqueue_registration = Arc::clone(&registration);
        let enqueue: EnqueueFn = Box::new(move |task| {
            {
                let mut slot = enqueue_registration.lock().unwrap();
                match *slot {
                    Registration::Armed => *slot = Registration::Enqueued,
                    Registration::Enqueued => {
                        panic!("event loop enqueue handle invoked twice")
                    }
                    Registration::Canceled => return,
                }
            }
            {
                let mut state = enqueue_shared.state.lock().unwrap();
                state.registered -= 1;
                state.queue.push_back(task);
            }
            enqueue_shared.wakeup();
        });

        let cancel_shared = Arc::clone(&self.shared);
        let cancel: CancelFn = Box::new(move || {
            {
                let mut slot = registration.lock().unwrap();
                match *slot {
                    Registration::Armed => *slot = Registration::Canceled,
                    _ => return,
                }
            }
            cancel_shared.state.lock().unwrap().registered -= 1;
            cancel_shared.wakeup();
        });

        (enqueue, cancel)
    }

    /// Drive the loop on the calling thread until no work remains.
    ///
    /// A provided `first_task` *replaces* the queue: the loop is single-run
    /// and anything enqueued before `start` is dropped with it. Returns the
    /// first task error (unexecuted tasks are pushed back to the front of
    /// the queue), the first unhandled promise rejection surviving a drain,
    /// the cancel token's error, or success on quiescence.
    pub fn start(&self, first_task: Option<Task>) -> Result<()> {
        if let Some(first) = first_task {
            let mut state = self.shared.state.lock().unwrap();
            state.queue.clear();
            state.queue.push_back(first);
        }

        loop {
            let (mut batch, awaiting) = self.pop_all();
            let progressed = !batch.is_empty();

            while let Some(task) = batch.pop_front() {
                if let Err(err) = task() {
                    self.put_in_front(batch);
                    return Err(err);
                }
            }

            self.check_promise_rejections()?;

            // A task that settles another registration may fire the wakeup
            // before we read `registered`; re-checking after progress (below)
            // keeps that race harmless.
            if !progressed && awaiting {
                self.wait_for_wakeup()?;
                continue;
            }

            if progressed {
                continue;
            }

            trace!("event loop quiescent");
            return Ok(());
        }
    }

    /// Block until no registrations and no queued tasks remain, with a hard
    /// 30 s ceiling. Returns the cancel token's error if it fires first.
    pub fn wait_on_registered(&self) -> Result<()> {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let mut state = self.shared.state.lock().unwrap();

        loop {
            let pending = state.registered;
            if pending == 0 && state.queue.is_empty() {
                return Ok(());
            }

            if let Some(err) = self.cancel.err() {
                return Err(err);
            }

            if Instant::now() >= deadline {
                debug!(pending, "event loop drain timed out");
                return Err(Error::LoopTimeout { pending });
            }

            let (next, _) = self
                .shared
                .wakeup_cv
                .wait_timeout(state, POLL_TICK)
                .unwrap();
            state = next;
        }
    }

    fn pop_all(&self) -> (VecDeque<Task>, bool) {
        let mut state = self.shared.state.lock().unwrap();
        let batch = std::mem::take(&mut state.queue);
        (batch, state.registered > 0)
    }

    fn put_in_front(&self, mut tasks: VecDeque<Task>) {
        if tasks.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        while let Some(task) = tasks.pop_back() {
            state.queue.push_front(task);
        }
    }

    /// Consume the wakeup token, waiting for a producer to deposit one.
    /// Cancellation is observed between ticks.
    fn wait_for_wakeup(&self) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.wakeup {
                state.wakeup = false;
                return Ok(());
            }
            if let Some(err) = self.cancel.err() {
                return Err(err);
            }
            let (next, _) = self
                .shared
                .wakeup_cv
                .wait_timeout(state, POLL_TICK)
                .unwrap();
            state = next;
        }
    }

    /// Extract one pending rejection, if any, and turn it into the loop's
    /// terminal error. An entry surviving a full drain is fatal.
    fn check_promise_rejections(&self) -> Result<()> {
        let promise = {
            let mut state = self.shared.state.lock().unwrap();
            let next = state.pending_rejections.iter().next().cloned();
            if let Some(ref promise) = next {
                state.pending_rejections.remove(promise);
            }
            next
        };

        let Some(promise) = promise else {
            return Ok(());
        };

        let Some(value) = promise.result() else {
            return Err(Error::UnhandledRejection { detail: None });
        };

        if value.is_null() || value.is_undefined() {
            return Err(Error::UnhandledRejection { detail: None });
        }

        if let Some(exception) = value.exported_exception() {
            return Err(normalize_exception(exception));
        }

        Err(Error::UnhandledRejection {
            detail: Some(value.display()),
        })
    }
}
