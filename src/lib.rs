//! Keygate - Per-key Request Admission Control
//!
//! This crate decides whether a request identified by a key (a user id, an
//! API token, a client address) may proceed under a time-based quota, and how
//! long the caller has to wait otherwise. Two independent policies are
//! provided: a sliding-window counter and a fixed-interval throttle. Both keep
//! their state in process memory and are safe to share across threads.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use crate::config::{FixedIntervalConfig, KeygateConfig, SlidingWindowConfig, SweeperConfig};
pub use crate::error::{KeygateError, Result};
pub use crate::ratelimit::{
    AdmissionPolicy, Clock, Decision, FixedIntervalLimiter, ManualClock, MonotonicClock,
    SlidingWindowLimiter, Sweep, Sweeper,
};
