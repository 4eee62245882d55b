//! Time source abstraction.
//!
//! The engine never reads the wall clock or sleeps directly; everything
//! goes through [`Clock`] so tests can substitute their own notion of
//! "now".

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wall-clock and suspension source for the engine.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Suspend the calling task until `deadline`.
    ///
    /// Returns immediately if the deadline has already passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let now = self.now();
        if deadline <= now {
            return;
        }
        let delta = (deadline - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.sleep(delta).await;
    }
}

/// Production clock backed by `chrono` and `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
