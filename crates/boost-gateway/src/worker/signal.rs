//! One-way readiness flag shared between a worker and its owner.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Set once by the worker, observed by any number of waiters.
///
/// Waiters may block a thread ([`wait`](Self::wait)) or suspend a task
/// ([`wait_async`](Self::wait_async)). Once set the flag never clears.
#[derive(Debug, Clone, Default)]
pub struct ReadySignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ready: Mutex<bool>,
    condvar: Condvar,
    notify: Notify,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter.
    ///
    /// Returns `true` for the call that actually set it, `false` afterwards.
    pub fn set(&self) -> bool {
        let mut ready = self.inner.ready.lock();
        if *ready {
            return false;
        }
        *ready = true;
        drop(ready);
        self.inner.condvar.notify_all();
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_set(&self) -> bool {
        *self.inner.ready.lock()
    }

    /// Block the calling thread until the flag is set or `timeout` passes.
    /// Returns whether the flag is set.
    /// A timeout too large to represent waits without a deadline.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut ready = self.inner.ready.lock();
        while !*ready {
            match deadline {
                Some(deadline) => {
                    if self.inner.condvar.wait_until(&mut ready, deadline).timed_out() {
                        return *ready;
                    }
                }
                None => self.inner.condvar.wait(&mut ready),
            }
        }
        true
    }

    /// Async counterpart of [`wait`](Self::wait).
    pub async fn wait_async(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                // Register before checking so a concurrent `set` cannot be missed.
                notified.as_mut().enable();
                if self.is_set() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
