//! Waiting between runs: the short retry backoff and the periodic tick.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[async_trait]
pub trait Pacer: Send {
    /// Short delay before retrying a failed run.
    async fn backoff(&mut self, delay: Duration);

    /// Blocks until the next scheduled run.
    async fn next_tick(&mut self);
}

/// Fixed-period ticker anchored at creation. The first tick is one full
/// period away because the first run starts immediately without it.
/// Ticks missed while runs were failing collapse into one.
pub struct IntervalPacer {
    interval: Interval,
}

impl IntervalPacer {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Pacer for IntervalPacer {
    async fn backoff(&mut self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    async fn next_tick(&mut self) {
        self.interval.tick().await;
    }
}
