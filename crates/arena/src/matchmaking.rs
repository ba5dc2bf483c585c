//! Per-time-control waiting lists with bot fallback.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tasks::TaskRegistry;
use crate::types::{ConnectionId, TimeControl, UserId};

/// A user waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user: UserId,
    pub connection: ConnectionId,
    pub time_control: TimeControl,
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic enqueue sequence. Distinguishes a re-queued user from the
    /// entry a stale fallback timer was scheduled for.
    pub seq: u64,
}

/// Two entries removed together by [`MatchmakingQueue::pair`]. The entry that
/// waited longer plays white.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub white: QueueEntry,
    pub black: QueueEntry,
}

/// Number of users waiting in one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub time_control: TimeControl,
    pub waiting: usize,
}

#[derive(Default)]
struct QueueInner {
    buckets: HashMap<TimeControl, VecDeque<QueueEntry>>,
    next_seq: u64,
}

impl QueueInner {
    fn remove_user(&mut self, user: UserId) -> Option<QueueEntry> {
        for bucket in self.buckets.values_mut() {
            if let Some(i) = bucket.iter().position(|e| e.user == user) {
                return bucket.remove(i);
            }
        }
        None
    }
}

/// FIFO buckets keyed by time control.
///
/// All bucket mutations go through one mutex, so enqueue, pair and cancel
/// are linearizable and an entry is consumed at most once. Fallback timers
/// live in a [`TaskRegistry`] keyed by user.
pub struct MatchmakingQueue {
    inner: Mutex<QueueInner>,
    fallbacks: TaskRegistry<UserId>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            fallbacks: TaskRegistry::new(),
        }
    }

    /// Add `user` to the `time_control` bucket, first removing them from any
    /// bucket they already occupy. Returns the entry and its 1-based
    /// position in the bucket.
    pub fn enqueue(
        &self,
        time_control: TimeControl,
        user: UserId,
        connection: ConnectionId,
    ) -> (QueueEntry, usize) {
        let mut inner = self.inner.lock();
        inner.remove_user(user);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = QueueEntry {
            user,
            connection,
            time_control,
            enqueued_at: Utc::now(),
            seq,
        };
        let bucket = inner.buckets.entry(time_control).or_default();
        bucket.push_back(entry.clone());
        let position = bucket.len();
        debug!(user_id = %user, time_control = %time_control, position, "enqueued");
        (entry, position)
    }

    /// Remove the two longest-waiting entries of a bucket, if it holds two.
    pub fn pair(&self, time_control: TimeControl) -> Option<Pairing> {
        let pairing = {
            let mut inner = self.inner.lock();
            let bucket = inner.buckets.get_mut(&time_control)?;
            if bucket.len() < 2 {
                return None;
            }
            let white = bucket.pop_front()?;
            let black = bucket.pop_front()?;
            Pairing { white, black }
        };
        self.release_fallback(&pairing.white);
        self.release_fallback(&pairing.black);
        info!(
            white = %pairing.white.user,
            black = %pairing.black.user,
            time_control = %time_control,
            "paired"
        );
        Some(pairing)
    }

    /// Remove `user` from every bucket and drop their fallback timer.
    /// Idempotent; returns the removed entry.
    pub fn cancel(&self, user: UserId) -> Option<QueueEntry> {
        let removed = self.inner.lock().remove_user(user)?;
        self.release_fallback(&removed);
        Some(removed)
    }

    /// Drop the fallback scheduled for `entry`. Runs after the bucket lock is
    /// released, so a fallback the user scheduled by re-queueing in between
    /// carries a newer sequence and survives.
    fn release_fallback(&self, entry: &QueueEntry) -> bool {
        self.fallbacks.cancel_if(&entry.user, entry.seq)
    }

    /// Remove exactly `entry` if it is still queued. A user who re-queued
    /// since holds a newer sequence and is left alone.
    pub fn take_if_present(&self, entry: &QueueEntry) -> bool {
        let mut inner = self.inner.lock();
        let Some(bucket) = inner.buckets.get_mut(&entry.time_control) else {
            return false;
        };
        match bucket
            .iter()
            .position(|e| e.user == entry.user && e.seq == entry.seq)
        {
            Some(i) => bucket.remove(i).is_some(),
            None => false,
        }
    }

    /// After `wait`, if `entry` is still queued, remove it and call
    /// `on_expire`. Replaces an earlier fallback for the same user.
    pub fn schedule_bot_fallback<F, Fut>(
        self: &Arc<Self>,
        entry: QueueEntry,
        wait: Duration,
        on_expire: F,
    ) -> bool
    where
        F: FnOnce(QueueEntry) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue = Arc::downgrade(self);
        let user = entry.user;
        let seq = entry.seq;
        self.fallbacks.schedule_tagged(user, seq, wait, async move {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            if queue.take_if_present(&entry) {
                info!(user_id = %entry.user, time_control = %entry.time_control, "no opponent found, falling back to bot");
                on_expire(entry).await;
            }
        })
    }

    pub fn has_fallback(&self, user: UserId) -> bool {
        self.fallbacks.contains(&user)
    }

    /// Bucket and 1-based position of `user`, if queued.
    pub fn position(&self, user: UserId) -> Option<(TimeControl, usize)> {
        let inner = self.inner.lock();
        inner.buckets.iter().find_map(|(tc, bucket)| {
            bucket
                .iter()
                .position(|e| e.user == user)
                .map(|i| (*tc, i + 1))
        })
    }

    /// Waiting counts for every time control, in category order.
    pub fn status(&self) -> Vec<QueueStatus> {
        let inner = self.inner.lock();
        TimeControl::ALL
            .iter()
            .map(|&time_control| QueueStatus {
                time_control,
                waiting: inner.buckets.get(&time_control).map_or(0, VecDeque::len),
            })
            .collect()
    }

    /// Total number of queued users.
    pub fn len(&self) -> usize {
        self.inner.lock().buckets.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn shutdown(&self, timeout: Duration) {
        self.fallbacks.shutdown(timeout).await;
        self.inner.lock().buckets.clear();
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new()
    }
}
