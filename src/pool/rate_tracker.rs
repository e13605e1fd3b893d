//! Per-credential sliding-window rate limiter.
//!
//! Tracks the timestamps of requests sent with one API key inside the
//! current rolling window. Expired timestamps are pruned lazily on every
//! acquisition attempt, so capacity comes back continuously as old
//! requests age out instead of in discrete refills. Bursts up to
//! `max_requests` are allowed inside any window.
//!
//! Not thread-safe on its own. The owning `KeySelector` serializes access.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Request budget for one credential: at most `max_requests` per `time_window`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub time_window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 5,
            time_window: Duration::from_secs(1),
        }
    }
}

/// Sliding-window counter for a single credential.
#[derive(Debug)]
pub struct KeyRateLimiter {
    limit: RateLimit,
    /// Timestamps of requests still inside the window, oldest first
    window: VecDeque<Instant>,
}

impl KeyRateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        let limit = RateLimit {
            max_requests: limit.max_requests.max(1),
            ..limit
        };
        Self {
            limit,
            window: VecDeque::with_capacity(limit.max_requests as usize),
        }
    }

    /// Try to take a request slot right now.
    ///
    /// Returns `Duration::ZERO` and records the request when capacity
    /// remains. Otherwise returns how long until the oldest request
    /// leaves the window, and records nothing.
    pub fn acquire(&mut self) -> Duration {
        self.acquire_at(Instant::now())
    }

    /// [`acquire`](Self::acquire) against an explicit clock reading.
    pub fn acquire_at(&mut self, now: Instant) -> Duration {
        let wait = self.wait_at(now);
        if wait.is_zero() {
            self.window.push_back(now);
        }
        wait
    }

    /// How long a caller would have to wait at `now`, without taking a slot.
    pub fn wait_at(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.window.len() < self.limit.max_requests as usize {
            return Duration::ZERO;
        }
        match self.window.front() {
            Some(&oldest) => (oldest + self.limit.time_window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Fill the remaining capacity at `now`.
    ///
    /// Used when the remote API reports a 429 for this key: our own
    /// accounting was too optimistic, so the key sits out a full window.
    pub fn saturate_at(&mut self, now: Instant) {
        self.prune(now);
        while self.window.len() < self.limit.max_requests as usize {
            self.window.push_back(now);
        }
    }

    /// Drop timestamps that are `time_window` or more in the past.
    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.window.front() {
            if now.saturating_duration_since(front) >= self.limit.time_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl KeyRateLimiter {
        fn in_window(&mut self, now: Instant) -> usize {
            self.prune(now);
            self.window.len()
        }
    }

    fn limiter(max: u32, window_ms: u64) -> KeyRateLimiter {
        KeyRateLimiter::new(RateLimit {
            max_requests: max,
            time_window: Duration::from_millis(window_ms),
        })
    }

    #[test]
    fn test_allows_burst_up_to_limit() {
        let mut l = limiter(5, 1000);
        let t0 = Instant::now();
        for _ in 0..5 {
            assert_eq!(l.acquire_at(t0), Duration::ZERO);
        }
        assert_eq!(l.in_window(t0), 5);
    }

    #[test]
    fn test_full_window_reports_wait_and_records_nothing() {
        let mut l = limiter(2, 1000);
        let t0 = Instant::now();
        l.acquire_at(t0);
        l.acquire_at(t0 + Duration::from_millis(300));

        let wait = l.acquire_at(t0 + Duration::from_millis(400));
        assert_eq!(wait, Duration::from_millis(600));
        assert_eq!(l.in_window(t0 + Duration::from_millis(400)), 2);
    }

    #[test]
    fn test_capacity_recovers_as_timestamps_age_out() {
        let mut l = limiter(2, 1000);
        let t0 = Instant::now();
        l.acquire_at(t0);
        l.acquire_at(t0 + Duration::from_millis(500));

        // Oldest has exactly left the window; the second is still inside.
        let t1 = t0 + Duration::from_millis(1000);
        assert_eq!(l.acquire_at(t1), Duration::ZERO);
        assert!(l.acquire_at(t1) > Duration::ZERO);
    }

    #[test]
    fn test_zero_max_is_clamped_to_one() {
        let mut l = limiter(0, 1000);
        let t0 = Instant::now();
        assert_eq!(l.acquire_at(t0), Duration::ZERO);
        assert!(l.acquire_at(t0) > Duration::ZERO);
    }

    #[test]
    fn test_saturate_blocks_for_full_window() {
        let mut l = limiter(3, 1000);
        let t0 = Instant::now();
        l.acquire_at(t0);
        l.saturate_at(t0);
        assert_eq!(l.wait_at(t0), Duration::from_millis(1000));
    }

    #[test]
    fn test_grants_never_exceed_limit_in_any_window() {
        let max = 4;
        let window = Duration::from_millis(1000);
        let mut l = limiter(max, 1000);
        let t0 = Instant::now();

        // Irregular arrival pattern: bursts, gaps, and steady ticks.
        let mut granted = Vec::new();
        let mut offset = 0u64;
        for i in 0..400u64 {
            offset += match i % 7 {
                0 => 0,
                1 | 2 => 37,
                3 => 250,
                4 => 3,
                5 => 111,
                _ => 9,
            };
            let now = t0 + Duration::from_millis(offset);
            if l.acquire_at(now).is_zero() {
                granted.push(now);
            }
        }

        assert!(!granted.is_empty());
        for (i, start) in granted.iter().enumerate() {
            let in_window = granted[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < window)
                .count();
            assert!(
                in_window <= max as usize,
                "{} grants inside one window starting at +{:?}",
                in_window,
                start.duration_since(t0)
            );
        }
    }
}
