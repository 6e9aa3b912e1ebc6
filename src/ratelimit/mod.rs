//! Rate limiting policies and state management.

mod clock;
mod fixed_interval;
mod policy;
mod sliding_window;
mod sweeper;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use fixed_interval::FixedIntervalLimiter;
pub use policy::{AdmissionPolicy, Decision, Sweep};
pub use sliding_window::SlidingWindowLimiter;
pub use sweeper::Sweeper;
