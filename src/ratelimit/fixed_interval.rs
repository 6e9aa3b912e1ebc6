//! Fixed-interval throttle.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, MonotonicClock};
use super::policy::{AdmissionPolicy, Decision, Sweep};
use crate::config::FixedIntervalConfig;
use crate::error::Result;

/// Admits at most one request per key every `min_interval`.
///
/// Only the time of the last admitted request is kept per key. Unlike the
/// sliding window there is no natural point at which an entry empties, so
/// keys stay in the map until [`sweep`](Self::sweep) removes them.
pub struct FixedIntervalLimiter<K = String> {
    /// Minimum spacing between admitted requests
    min_interval: Duration,
    /// Last admission time indexed by key
    last_admitted: DashMap<K, Duration>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash> FixedIntervalLimiter<K> {
    /// Create a limiter driven by a [`MonotonicClock`].
    pub fn new(config: FixedIntervalConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(config: FixedIntervalConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let min_interval = config.min_interval()?;

        debug!(min_interval = ?min_interval, "Creating fixed interval limiter");

        Ok(Self {
            min_interval,
            last_admitted: DashMap::new(),
            clock,
        })
    }

    /// Get the minimum interval.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether a request for `key` would be admitted right now.
    pub fn can_send<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let now = self.clock.now();
        let allowed = match self.last_admitted.get(key) {
            Some(last) => self.elapsed_enough(*last, now),
            None => true,
        };

        trace!(key = ?key, allowed = allowed, "Checking fixed interval");

        allowed
    }

    /// Admit and record a request for `key`.
    ///
    /// A rejected call leaves the stored last admission time unchanged.
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

        let decision = match self.last_admitted.get_mut(key) {
            Some(mut last) => self.decide(&mut last, now),
            None => match self.last_admitted.entry(key.to_owned()) {
                Entry::Occupied(mut entry) => self.decide(entry.get_mut(), now),
                Entry::Vacant(entry) => {
                    entry.insert(now);
                    Decision::Allowed
                }
            },
        };

        match decision {
            Decision::Allowed => trace!(key = ?key, "Request admitted"),
            Decision::Rejected { retry_after } => debug!(
                key = ?key,
                retry_after = ?retry_after,
                "Fixed interval not yet elapsed"
            ),
        }

        decision
    }

    /// How long until a request for `key` would be admitted.
    pub fn time_until_next_allowed<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let now = self.clock.now();
        self.last_admitted
            .get(key)
            .map_or(Duration::ZERO, |last| self.wait_for(*last, now))
    }

    /// Remove keys whose last admission is at least `min_interval` old.
    ///
    /// Such keys are admissible again and carry no information, so dropping
    /// them is not observable. Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.last_admitted.retain(|_, last| {
            if self.elapsed_enough(*last, now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.last_admitted.len(),
                "Swept idle keys"
            );
        }

        removed
    }

    /// Get the number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.last_admitted.len()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.last_admitted.clear();
    }

    fn decide(&self, last: &mut Duration, now: Duration) -> Decision {
        if self.elapsed_enough(*last, now) {
            *last = now;
            Decision::Allowed
        } else {
            Decision::Rejected {
                retry_after: self.wait_for(*last, now),
            }
        }
    }

    // A clock reading behind `last` counts as zero elapsed time.
    fn elapsed_enough(&self, last: Duration, now: Duration) -> bool {
        now.saturating_sub(last) >= self.min_interval
    }

    fn wait_for(&self, last: Duration, now: Duration) -> Duration {
        self.min_interval.saturating_sub(now.saturating_sub(last))
    }
}

impl<K, Q> AdmissionPolicy<Q> for FixedIntervalLimiter<K>
where
    K: Eq + Hash + Borrow<Q> + Send + Sync,
    Q: Hash + Eq + Debug + ToOwned<Owned = K> + ?Sized,
{
    fn can_send(&self, key: &Q) -> bool {
        FixedIntervalLimiter::can_send(self, key)
    }

    fn record(&self, key: &Q) -> bool {
        FixedIntervalLimiter::record(self, key)
    }

    fn time_until_next_allowed(&self, key: &Q) -> Duration {
        FixedIntervalLimiter::time_until_next_allowed(self, key)
    }

    fn try_acquire(&self, key: &Q) -> Decision {
        FixedIntervalLimiter::try_acquire(self, key)
    }
}

impl<K: Eq + Hash + Send + Sync> Sweep for FixedIntervalLimiter<K> {
    fn sweep(&self) -> usize {
        FixedIntervalLimiter::sweep(self)
    }

    fn tracked_keys(&self) -> usize {
        FixedIntervalLimiter::tracked_keys(self)
    }
}
