//! Keyed debouncer.
//!
//! [`Debouncer::schedule`] queues an action to run after a quiet period for
//! its key. Scheduling the same key again before the period ends replaces
//! the queued action and restarts the timer; only the last action runs.
//!
//! Actions of one key never overlap: an action whose timer fires while an
//! earlier action of the same key is still executing waits for it to
//! finish. Rescheduling only ever replaces the *queued* action, never one
//! that is already executing. Different keys are fully independent.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A timer waiting to fire for one key.
struct Queued {
    generation: u64,
    handle: AbortHandle,
}

/// Per-key state.
struct Slot {
    queued: Option<Queued>,
    /// Actions that have fired and are waiting for or holding `lane`.
    running: usize,
    /// Serializes executing actions of this key.
    lane: Arc<tokio::sync::Mutex<()>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            queued: None,
            running: 0,
            lane: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    const fn is_idle(&self) -> bool {
        self.queued.is_none() && self.running == 0
    }
}

struct Inner<K> {
    slots: HashMap<K, Slot>,
    next_generation: u64,
}

/// Coalesces repeated actions per key into one delayed run.
///
/// Must be used from within a tokio runtime. Dropping the debouncer aborts
/// every queued timer; actions already executing run to completion.
pub struct Debouncer<K> {
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Default for Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Creates a debouncer with no queued actions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Queues `action` to run once `delay` has passed without another
    /// `schedule` for the same key.
    ///
    /// Replaces (and never runs) any action still queued for `key`, in
    /// which case `true` is returned.
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let shared = Arc::clone(&self.inner);

        let mut inner = self.inner.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);
        let replaced = slot.queued.take().map(|previous| previous.handle.abort()).is_some();
        let lane = Arc::clone(&slot.lane);

        // The spawned task cannot observe the slot before `queued` is set
        // below: it has to take the same lock first.
        let timer_key = key;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut inner = shared.lock();
                let Some(slot) = inner.slots.get_mut(&timer_key) else {
                    return;
                };
                if slot.queued.as_ref().map(|q| q.generation) != Some(generation) {
                    return;
                }
                slot.queued = None;
                slot.running += 1;
            }

            let guard = lane.lock().await;
            action.await;
            drop(guard);

            let mut inner = shared.lock();
            if let Some(slot) = inner.slots.get_mut(&timer_key) {
                slot.running = slot.running.saturating_sub(1);
                if slot.is_idle() {
                    inner.slots.remove(&timer_key);
                }
            }
        });

        slot.queued = Some(Queued {
            generation,
            handle: handle.abort_handle(),
        });
        replaced
    }

    /// Drops the action queued for `key` without running it.
    ///
    /// Returns `true` if an action was queued. An action that is already
    /// executing is not affected.
    pub fn cancel(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(key) else {
            return false;
        };
        let Some(queued) = slot.queued.take() else {
            return false;
        };
        queued.handle.abort();
        if slot.is_idle() {
            inner.slots.remove(key);
        }
        true
    }

    /// Returns `true` if an action is queued (not yet fired) for `key`.
    #[must_use]
    pub fn is_queued(&self, key: &K) -> bool {
        self.inner
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.queued.is_some())
    }

    /// Keys with a queued or executing action.
    #[must_use]
    pub fn pending(&self) -> Vec<K> {
        self.inner.lock().slots.keys().cloned().collect()
    }

    /// Returns `true` if no action is queued or executing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        for slot in inner.slots.values() {
            if let Some(queued) = &slot.queued {
                queued.handle.abort();
            }
        }
    }
}
