#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time, for scheduling.
    fn now(&self) -> Instant;
    /// Wall-clock time, for timestamps.
    fn wall(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
