//! Heartbeat and liveness primitives
//!
//! Both ends of a connection emit heartbeats on a fixed period and consider
//! the peer gone once nothing has been heard from it for
//! `heartbeat_interval * liveness`. [`HeartbeatTimer`] drives the emission
//! side inside a `tokio::select!` loop; [`Liveness`] tracks the receive side.

use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Periodic tick for heartbeat emission or sweeps.
///
/// The first tick fires one full period after creation, not immediately.
/// `tick()` is cancel-safe, so the timer can sit in a `select!` arm.
#[derive(Debug)]
pub struct HeartbeatTimer {
    interval: Interval,
    period: Duration,
}

impl HeartbeatTimer {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Receive-side liveness of a peer.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    last_seen: Instant,
}

impl Liveness {
    pub fn new(now: Instant) -> Self {
        Self { last_seen: now }
    }

    /// Records proof of life: a heartbeat, a reply or any valid message.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// True once the peer has been silent for strictly longer than `timeout`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.age(now) > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_expiry_boundary() {
        let start = Instant::now();
        let liveness = Liveness::new(start);
        let timeout = Duration::from_secs(5);

        assert!(!liveness.is_expired(start + Duration::from_millis(2500), timeout));
        assert!(!liveness.is_expired(start + timeout, timeout));
        assert!(liveness.is_expired(start + Duration::from_secs(6), timeout));
    }

    #[test]
    fn test_touch_resets_age() {
        let start = Instant::now();
        let mut liveness = Liveness::new(start);
        let later = start + Duration::from_secs(4);
        liveness.touch(later);

        assert_eq!(liveness.age(later + Duration::from_secs(1)), Duration::from_secs(1));
        assert!(!liveness.is_expired(start + Duration::from_secs(8), Duration::from_secs(5)));
    }

    #[test]
    fn test_age_before_last_seen_is_zero() {
        let start = Instant::now();
        let liveness = Liveness::new(start + Duration::from_secs(1));
        assert_eq!(liveness.age(start), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timer_first_tick_after_period() {
        let start = Instant::now();
        let mut timer = HeartbeatTimer::new(Duration::from_millis(2500));

        let first = timer.tick().await;
        assert_eq!(first - start, Duration::from_millis(2500));

        let second = timer.tick().await;
        assert_eq!(second - first, Duration::from_millis(2500));
        assert_eq!(timer.period(), Duration::from_millis(2500));
    }
}
