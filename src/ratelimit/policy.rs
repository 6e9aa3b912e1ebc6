//! Admission policy trait shared by the limiter implementations.

use std::time::Duration;

/// Outcome of [`AdmissionPolicy::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request was admitted and recorded.
    Allowed,
    /// The request was rejected; nothing was recorded.
    Rejected {
        /// How long until the key can be admitted again.
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// State housekeeping shared by every policy.
///
/// Kept apart from [`AdmissionPolicy`] so a [`Sweeper`](super::Sweeper) can
/// drive any limiter without knowing its key type.
pub trait Sweep: Send + Sync {
    /// Drop state for keys that no longer influence any decision. Returns the
    /// number of keys removed.
    fn sweep(&self) -> usize;

    /// Number of keys currently holding state.
    fn tracked_keys(&self) -> usize;
}

/// Trait for admission policies.
///
/// This trait abstracts over the sliding-window and fixed-interval limiters
/// so callers can hold either behind the same handle, e.g.
/// `Arc<dyn AdmissionPolicy<str>>`. `Q` is the borrowed key type accepted by
/// the calls.
pub trait AdmissionPolicy<Q: ?Sized>: Sweep {
    /// Whether a request for `key` would be admitted right now.
    fn can_send(&self, key: &Q) -> bool;

    /// Admit and record a request for `key`, or reject it without touching
    /// state.
    fn record(&self, key: &Q) -> bool;

    /// How long until a request for `key` would be admitted. Zero means now.
    fn time_until_next_allowed(&self, key: &Q) -> Duration;

    /// Record a request and report the wait hint on rejection.
    fn try_acquire(&self, key: &Q) -> Decision {
        if self.record(key) {
            Decision::Allowed
        } else {
            Decision::Rejected {
                retry_after: self.time_until_next_allowed(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_is_allowed() {
        assert!(Decision::Allowed.is_allowed());
        assert!(!Decision::Rejected {
            retry_after: Duration::from_secs(1)
        }
        .is_allowed());
    }
}
