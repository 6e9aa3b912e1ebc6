//! Background eviction of idle keys.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, trace};

use super::policy::Sweep;
use crate::config::SweeperConfig;
use crate::error::Result;

/// Smallest period accepted by the ticker.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a task that periodically calls [`Sweep::sweep`] on a limiter.
///
/// The task stops when [`stop`](Self::stop) is awaited or the handle is
/// dropped.
pub struct Sweeper {
    /// Signals the task to exit
    shutdown: Option<oneshot::Sender<()>>,
    /// The running task
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a sweeper on the current tokio runtime.
    ///
    /// The first sweep runs one `interval` after spawning.
    pub fn spawn<P>(policy: Arc<P>, interval: Duration) -> Self
    where
        P: Sweep + ?Sized + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        info!(interval = ?interval, "Starting idle key sweeper");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = policy.sweep();
                        trace!(
                            removed = removed,
                            tracked = policy.tracked_keys(),
                            "Sweep finished"
                        );
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            info!("Idle key sweeper stopped");
        });

        Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    /// Spawn a sweeper as described by `config`.
    ///
    /// Returns `None` when sweeping is disabled.
    pub fn from_config<P>(policy: Arc<P>, config: &SweeperConfig) -> Result<Option<Self>>
    where
        P: Sweep + ?Sized + 'static,
    {
        if !config.enabled {
            info!("Idle key sweeper disabled");
            return Ok(None);
        }

        let interval = config.interval()?;
        Ok(Some(Self::spawn(policy, interval)))
    }

    /// Stop the sweeper and wait for its task to finish.
    pub async fn stop(mut self) {
        self.signal_shutdown();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Sweeper task failed");
            }
        }
    }

    fn signal_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already be gone; nothing to do then.
            let _ = shutdown.send(());
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FixedIntervalConfig, SlidingWindowConfig};
    use crate::ratelimit::{
        AdmissionPolicy, FixedIntervalLimiter, ManualClock, SlidingWindowLimiter,
    };
    use tokio_test::assert_ok;

    fn sliding_limiter(clock: Arc<ManualClock>) -> Arc<SlidingWindowLimiter> {
        Arc::new(
            SlidingWindowLimiter::with_clock(SlidingWindowConfig::new(1.0, 1), clock).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_idle_keys() {
        let clock = Arc::new(ManualClock::new());
        let limiter = sliding_limiter(clock.clone());

        limiter.record("a");
        limiter.record("b");
        assert_eq!(limiter.tracked_keys(), 2);

        let sweeper = Sweeper::spawn(limiter.clone(), Duration::from_secs(5));

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(limiter.tracked_keys(), 0);
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_active_keys() {
        let clock = Arc::new(ManualClock::new());
        let limiter = sliding_limiter(clock.clone());

        let sweeper = Sweeper::spawn(limiter.clone(), Duration::from_secs(1));

        for _ in 0..5 {
            clock.advance(Duration::from_millis(1100));
            assert!(limiter.record("busy"));
            tokio::time::sleep(Duration::from_millis(1100)).await;
            assert_eq!(limiter.tracked_keys(), 1);
        }

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_sweeper_no_longer_runs() {
        let clock = Arc::new(ManualClock::new());
        let limiter = sliding_limiter(clock.clone());

        let sweeper = Sweeper::spawn(limiter.clone(), Duration::from_secs(1));
        sweeper.stop().await;

        limiter.record("a");
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_sweeper() {
        let clock = Arc::new(ManualClock::new());
        let limiter = sliding_limiter(clock.clone());

        drop(Sweeper::spawn(limiter.clone(), Duration::from_secs(1)));

        limiter.record("a");
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_over_trait_object() {
        let clock = Arc::new(ManualClock::new());
        let policy: Arc<dyn AdmissionPolicy<str>> = Arc::new(
            FixedIntervalLimiter::<String>::with_clock(
                FixedIntervalConfig::new(3.0),
                clock.clone(),
            )
            .unwrap(),
        );

        assert!(policy.record("a"));
        let sweeper = Sweeper::spawn(policy.clone(), Duration::from_secs(2));

        clock.advance(Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(policy.tracked_keys(), 0);
        assert!(policy.can_send("a"));
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_from_config_disabled() {
        let clock = Arc::new(ManualClock::new());
        let limiter = sliding_limiter(clock);

        let config = SweeperConfig {
            enabled: false,
            interval_secs: 1.0,
        };
        let sweeper = assert_ok!(Sweeper::from_config(limiter, &config));
        assert!(sweeper.is_none());
    }

    #[tokio::test]
    async fn test_from_config_rejects_bad_interval() {
        let clock = Arc::new(ManualClock::new());
        let limiter = sliding_limiter(clock);

        let config = SweeperConfig {
            enabled: true,
            interval_secs: 0.0,
        };
        assert!(Sweeper::from_config(limiter, &config).is_err());
    }
}
