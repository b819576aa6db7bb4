//! Repeating connectivity check timer that can be disarmed.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Wraps an optional [`Interval`]. While stopped, [`ConnectivityTimer::tick`]
/// never completes, so it can sit in a `select!` unconditionally.
#[derive(Debug)]
pub struct ConnectivityTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl ConnectivityTimer {
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Arm the timer. The first tick fires immediately. Re-arming replaces the
    /// previous schedule.
    pub fn start(&mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Arm the timer with the first tick one period from now.
    pub fn start_delayed(&mut self) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub const fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}
