//! Delayed and repeating callbacks on the tokio runtime
//!
//! Every timer belongs to an owner (a conversation or call id) so that the
//! owner can cancel everything it scheduled in one call on teardown.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Cheap to clone; clones share the same timer registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Registry>,
}

struct Registry {
    runtime: Handle,
    next_id: AtomicU64,
    timers: Mutex<HashMap<String, HashMap<TimerId, JoinHandle<()>>>>,
}

impl Registry {
    fn forget(&self, owner: &str, id: TimerId) {
        let mut timers = self.timers.lock();
        if let Some(owned) = timers.get_mut(owner) {
            owned.remove(&id);
            if owned.is_empty() {
                timers.remove(owner);
            }
        }
    }
}

impl Scheduler {
    /// Binds to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        Ok(Self::with_handle(Handle::try_current()?))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Registry {
                runtime,
                next_id: AtomicU64::new(1),
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn next_id(&self) -> TimerId {
        TimerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `callback` once after `delay`. The timer is unregistered before
    /// the callback runs, so the callback may schedule a successor.
    pub fn schedule_once<F>(&self, owner: &str, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id();
        let registry: Weak<Registry> = Arc::downgrade(&self.inner);
        let owner_key = owner.to_string();
        let deadline = Instant::now() + delay;

        // Held across the spawn so the task cannot unregister before it is registered.
        let mut timers = self.inner.timers.lock();
        let task = self.inner.runtime.spawn(async move {
            time::sleep_until(deadline).await;
            if let Some(registry) = registry.upgrade() {
                registry.forget(&owner_key, id);
            }
            callback();
        });
        timers.entry(owner.to_string()).or_default().insert(id, task);

        tracing::trace!(owner, timer = id.0, ?delay, "Scheduled one-shot timer");
        id
    }

    /// Runs `callback` every `period`, first one period from now, until it
    /// returns `ControlFlow::Break` or the timer is cancelled.
    pub fn schedule_repeating<F>(&self, owner: &str, period: Duration, mut callback: F) -> TimerId
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let id = self.next_id();
        let registry: Weak<Registry> = Arc::downgrade(&self.inner);
        let owner_key = owner.to_string();
        let start = Instant::now() + period;

        let mut timers = self.inner.timers.lock();
        let task = self.inner.runtime.spawn(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if callback().is_break() {
                    break;
                }
            }
            if let Some(registry) = registry.upgrade() {
                registry.forget(&owner_key, id);
            }
        });
        timers.entry(owner.to_string()).or_default().insert(id, task);

        tracing::trace!(owner, timer = id.0, ?period, "Scheduled repeating timer");
        id
    }

    /// Cancels one timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self, owner: &str, id: TimerId) -> bool {
        let mut timers = self.inner.timers.lock();
        let Some(owned) = timers.get_mut(owner) else {
            return false;
        };
        let removed = owned.remove(&id);
        if owned.is_empty() {
            timers.remove(owner);
        }
        match removed {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer of `owner` and returns how many there were.
    pub fn cancel_all_for(&self, owner: &str) -> usize {
        let owned = self.inner.timers.lock().remove(owner);
        let Some(owned) = owned else {
            return 0;
        };
        let count = owned.len();
        for task in owned.into_values() {
            task.abort();
        }
        tracing::debug!(owner, count, "Cancelled pending timers");
        count
    }

    pub fn pending_for(&self, owner: &str) -> usize {
        self.inner
            .timers
            .lock()
            .get(owner)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}
