use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Keyed registry of cancellable background tasks.
///
/// At most one task runs per key. Spawning under an occupied key cancels the
/// previous task. Each task gets a [`CancellationToken`] that is cancelled on
/// [`cancel`](Self::cancel), on replacement and on [`shutdown`](Self::shutdown).
/// A task removes its own slot when it exits, unless a newer task has taken
/// the key in the meantime.
pub struct TaskRegistry<K> {
    slots: Arc<DashMap<K, Arc<TaskSlot>>>,
    generation: AtomicU64,
    root: CancellationToken,
}

struct TaskSlot {
    generation: u64,
    /// Caller-chosen label checked by [`TaskRegistry::cancel_if`].
    tag: u64,
    cancel: CancellationToken,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<K> TaskRegistry<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Spawn `task` under `key`, replacing any task already registered there.
    ///
    /// Returns `false` without spawning once the registry has been shut down.
    pub fn spawn<F, Fut>(&self, key: K, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_slot(key, 0, |cancel, _| task(cancel))
    }

    fn spawn_slot<F, Fut>(&self, key: K, tag: u64, task: F) -> bool
    where
        F: FnOnce(CancellationToken, u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(TaskSlot {
            generation,
            tag,
            cancel: self.root.child_token(),
            handle: parking_lot::Mutex::new(None),
        });
        if let Some(previous) = self.slots.insert(key.clone(), Arc::clone(&slot)) {
            previous.cancel.cancel();
        }

        let fut = task(slot.cancel.clone(), generation);
        let slots = Arc::clone(&self.slots);
        let handle = tokio::spawn(async move {
            fut.await;
            slots.remove_if(&key, |_, s| s.generation == generation);
        });

        // The task may already have exited and removed its slot; storing the
        // handle into a detached slot is harmless.
        *slot.handle.lock() = Some(handle);
        true
    }

    /// Run `task` once after `delay` unless cancelled first.
    ///
    /// The slot is released before `task` starts, so the task itself may
    /// register a new task under the same key.
    pub fn schedule_after<Fut>(&self, key: K, delay: Duration, task: Fut) -> bool
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_tagged(key, 0, delay, task)
    }

    /// [`schedule_after`](Self::schedule_after) with a `tag` that
    /// [`cancel_if`](Self::cancel_if) can match against.
    pub fn schedule_tagged<Fut>(&self, key: K, tag: u64, delay: Duration, task: Fut) -> bool
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let slot_key = key.clone();
        self.spawn_slot(key, tag, move |cancel, generation| async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Release the slot before running so a cancel(key) issued
                    // by the task's own work does not target itself.
                    slots.remove_if(&slot_key, |_, s| s.generation == generation);
                    task.await;
                }
            }
        })
    }

    /// Cancel the task registered under `key`. Idempotent.
    pub fn cancel(&self, key: &K) -> bool {
        match self.slots.remove(key) {
            Some((_, slot)) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the task under `key` only if it was scheduled with `tag`.
    /// A newer task registered under the same key is left running.
    pub fn cancel_if(&self, key: &K, tag: u64) -> bool {
        match self.slots.remove_if(key, |_, slot| slot.tag == tag) {
            Some((_, slot)) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cancel every task and wait up to `timeout` for all of them to exit.
    /// Tasks still running after the timeout are aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        self.root.cancel();

        let keys: Vec<K> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                slot.cancel.cancel();
                if let Some(handle) = slot.handle.lock().take() {
                    handles.push(handle);
                }
            }
        }

        let count = handles.len();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!(tasks = count, "tasks did not stop within shutdown timeout, aborting");
            for abort in aborts {
                abort.abort();
            }
        } else {
            debug!(tasks = count, "task registry shut down");
        }
    }
}

impl<K> Default for TaskRegistry<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_runs_after_delay() {
        let registry = TaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        registry.schedule_after("k", Duration::from_millis(500), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.contains(&"k"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let registry = TaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        registry.schedule_after(1u32, Duration::from_secs(1), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.cancel(&1));
        assert!(!registry.cancel(&1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawning_same_key_replaces_previous() {
        let registry = TaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for value in [1usize, 10] {
            let f = Arc::clone(&fired);
            registry.schedule_after("bot", Duration::from_millis(100), async move {
                f.fetch_add(value, Ordering::SeqCst);
            });
        }
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_if_spares_a_newer_task() {
        let registry = TaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for tag in [1u64, 2] {
            let f = Arc::clone(&fired);
            registry.schedule_tagged("user", tag, Duration::from_secs(1), async move {
                f.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(!registry.cancel_if(&"user", 1));
        assert!(registry.contains(&"user"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!registry.cancel_if(&"user", 2));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_looping_tasks() {
        let registry = TaskRegistry::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        registry.spawn("ticker", move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        t.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        registry.shutdown(Duration::from_secs(1)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(!registry.spawn("late", |_| async {}));
    }
}
