//! Cancellation tokens threaded into event loops.
//!
//! A [`CancelToken`] is the host-supplied handle a loop consults at its
//! suspension points. It carries an explicit cancel flag and an optional
//! wall-clock deadline; a default token never fires. Tokens are cheap to
//! clone and all clones observe the same state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;

/// Cloneable cancellation handle observed by [`EventLoop`](crate::EventLoop)
/// at suspension points. Running tasks are never interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    canceled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never cancels on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// A token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Fire the token. Idempotent; all clones observe the cancellation.
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
    }

    /// True once the token has been canceled or its deadline has passed.
    pub fn is_canceled(&self) -> bool {
        self.err().is_some()
    }

    /// The error a loop should return for this token, if it has fired.
    /// Explicit cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<Error> {
        if self.inner.canceled.load(Ordering::SeqCst) {
            return Some(Error::Canceled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }
}
