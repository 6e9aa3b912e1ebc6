//! Sliding-window request limiter.

use dashmap::DashMap;
use std::borrow::Borrow;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, MonotonicClock};
use super::policy::{AdmissionPolicy, Decision, Sweep};
use crate::config::SlidingWindowConfig;
use crate::error::Result;

/// Admits at most `max_requests` requests per key within any trailing window
/// of `window_size`.
///
/// Each key keeps the timestamps of its admitted requests, oldest first.
/// Every call on a key first drops the timestamps that have left the window,
/// and a key whose history empties is removed from the map, so idle keys cost
/// nothing once they are touched again or swept.
///
/// State is sharded with [`DashMap`]: calls for the same key serialize on the
/// shard lock (prune, check and append happen under one lock, so concurrent
/// callers cannot over-admit), calls for different keys run in parallel.
pub struct SlidingWindowLimiter<K = String> {
    /// Length of the trailing window
    window_size: Duration,
    /// Requests admitted per key within one window
    max_requests: u32,
    /// Admitted request timestamps indexed by key, oldest first
    history: DashMap<K, VecDeque<Duration>>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash> SlidingWindowLimiter<K> {
    /// Create a limiter driven by a [`MonotonicClock`].
    pub fn new(config: SlidingWindowConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a limiter reading time from `clock`.
    ///
    /// Fails when the configured window is not a positive, finite number of
    /// seconds.
    pub fn with_clock(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let window_size = config.window_size()?;

        debug!(
            window_size = ?window_size,
            max_requests = config.max_requests,
            "Creating sliding window limiter"
        );

        Ok(Self {
            window_size,
            max_requests: config.max_requests,
            history: DashMap::new(),
            clock,
        })
    }

    /// Get the window length.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Get the per-window capacity.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Whether a request for `key` would be admitted right now.
    ///
    /// Expired timestamps are pruned as a side effect.
    pub fn can_send<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let now = self.clock.now();
        let count = self.with_pruned(key, now, |history| history.len()).unwrap_or(0);
        let allowed = count < self.capacity();

        trace!(key = ?key, count = count, allowed = allowed, "Checking sliding window");

        allowed
    }

    /// Admit and record a request for `key`.
    ///
    /// Returns `false` without modifying the key's history when the window is
    /// already full.
    pub fn record<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ToOwned<Owned = K> + ?Sized,
    {
        self.try_acquire(key).is_allowed()
    }

    /// Admit and record a request for `key`, reporting how long to wait when
    /// it is rejected.
    pub fn try_acquire<Q>(&self, key: &Q) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ToOwned<Owned = K> + ?Sized,
    {
        let now = self.clock.now();

        let decision = match self.with_pruned(key, now, |history| self.decide(history, now)) {
            Some(decision) => decision,
            // Nothing can ever be admitted, so never create an entry.
            None if self.max_requests == 0 => Decision::Rejected {
                retry_after: Duration::ZERO,
            },
            None => {
                let mut history = self.history.entry(key.to_owned()).or_default();
                self.decide(&mut history, now)
            }
        };

        match decision {
            Decision::Allowed => trace!(key = ?key, "Request admitted"),
            Decision::Rejected { retry_after } => debug!(
                key = ?key,
                retry_after = ?retry_after,
                "Sliding window limit exceeded"
            ),
        }

        decision
    }

    /// How long until a request for `key` would be admitted.
    ///
    /// Zero when the key has spare capacity or no history at all; otherwise
    /// the time until its oldest in-window timestamp expires.
    pub fn time_until_next_allowed<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let now = self.clock.now();
        self.with_pruned(key, now, |history| self.wait_for(history, now))
            .unwrap_or(Duration::ZERO)
    }

    /// Requests `key` may still make in the current window.
    pub fn remaining<Q>(&self, key: &Q) -> u32
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let now = self.clock.now();
        let count = self.with_pruned(key, now, |history| history.len()).unwrap_or(0);
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.max_requests.saturating_sub(count)
    }

    /// Prune every key and remove the ones left without history.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.history.retain(|_, history| {
            prune(history, now, self.window_size);
            if history.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(removed = removed, remaining = self.history.len(), "Swept idle keys");
        }

        removed
    }

    /// Get the number of keys currently holding history.
    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.history.clear();
    }

    fn capacity(&self) -> usize {
        usize::try_from(self.max_requests).unwrap_or(usize::MAX)
    }

    /// Run `f` on the pruned history of `key`, removing the entry afterwards
    /// if it is empty. Returns `None` when the key has no entry.
    fn with_pruned<Q, R>(
        &self,
        key: &Q,
        now: Duration,
        f: impl FnOnce(&mut VecDeque<Duration>) -> R,
    ) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut history = self.history.get_mut(key)?;
        prune(&mut history, now, self.window_size);

        let result = f(&mut history);
        let is_empty = history.is_empty();
        drop(history);

        if is_empty {
            // Re-checked under the shard lock in case another caller appended.
            self.history.remove_if(key, |_, history| history.is_empty());
        }

        Some(result)
    }

    fn decide(&self, history: &mut VecDeque<Duration>, now: Duration) -> Decision {
        if history.len() < self.capacity() {
            // A regressed clock must not break ascending order.
            let timestamp = history.back().map_or(now, |&newest| newest.max(now));
            history.push_back(timestamp);
            Decision::Allowed
        } else {
            Decision::Rejected {
                retry_after: self.wait_for(history, now),
            }
        }
    }

    fn wait_for(&self, history: &VecDeque<Duration>, now: Duration) -> Duration {
        if history.len() < self.capacity() {
            return Duration::ZERO;
        }

        let Some(&oldest) = history.front() else {
            return Duration::ZERO;
        };

        oldest
            .saturating_add(self.window_size)
            .saturating_sub(now)
            .min(self.window_size)
    }
}

/// Drop timestamps at or before `now - window` from the front of `history`.
fn prune(history: &mut VecDeque<Duration>, now: Duration, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };

    while history.front().is_some_and(|&timestamp| timestamp <= cutoff) {
        history.pop_front();
    }
}

impl<K, Q> AdmissionPolicy<Q> for SlidingWindowLimiter<K>
where
    K: Eq + Hash + Borrow<Q> + Send + Sync,
    Q: Hash + Eq + Debug + ToOwned<Owned = K> + ?Sized,
{
    fn can_send(&self, key: &Q) -> bool {
        SlidingWindowLimiter::can_send(self, key)
    }

    fn record(&self, key: &Q) -> bool {
        SlidingWindowLimiter::record(self, key)
    }

    fn time_until_next_allowed(&self, key: &Q) -> Duration {
        SlidingWindowLimiter::time_until_next_allowed(self, key)
    }

    fn try_acquire(&self, key: &Q) -> Decision {
        SlidingWindowLimiter::try_acquire(self, key)
    }
}

impl<K: Eq + Hash + Send + Sync> Sweep for SlidingWindowLimiter<K> {
    fn sweep(&self) -> usize {
        SlidingWindowLimiter::sweep(self)
    }

    fn tracked_keys(&self) -> usize {
        SlidingWindowLimiter::tracked_keys(self)
    }
}
