//! Sliding-window rate limiter for outbound remote operations

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Admission gate bounding outbound remote operations per unit time.
///
/// Keeps a sliding window of operation timestamps; an operation is admitted
/// only while fewer than `max_ops` timestamps fall within the trailing
/// window. State is in-memory only and resets on restart. None of the
/// methods can fail: callers that cannot acquire a slot must defer.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_ops: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub const fn new(max_ops: usize, window: Duration) -> Self {
        Self {
            max_ops,
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Non-consuming check: would an operation be admitted right now?
    #[must_use]
    pub fn can_proceed(&self) -> bool {
        self.in_window(Instant::now()) < self.max_ops
    }

    /// Consume a slot if one is available.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        self.prune(now);
        if self.timestamps.len() < self.max_ops {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Slots left in the current window.
    #[must_use]
    pub fn remaining_operations(&self) -> usize {
        self.max_ops.saturating_sub(self.in_window(Instant::now()))
    }

    /// Time until the oldest in-window timestamp ages out. Zero when a slot
    /// is free right now.
    #[must_use]
    pub fn time_until_next_slot(&self) -> Duration {
        let now = Instant::now();
        if self.in_window(now) < self.max_ops {
            return Duration::ZERO;
        }
        self.timestamps
            .iter()
            .find(|stamp| now.duration_since(**stamp) < self.window)
            .map_or(Duration::ZERO, |oldest| {
                self.window.saturating_sub(now.duration_since(*oldest))
            })
    }

    fn in_window(&self, now: Instant) -> usize {
        self.timestamps
            .iter()
            .filter(|stamp| now.duration_since(**stamp) < self.window)
            .count()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit_then_defers() {
        let mut limiter = SlidingWindowLimiter::new(3, Duration::from_millis(1000));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        // The N+1th operation within the window is deferred, not dropped
        assert!(!limiter.try_acquire());
        assert!(!limiter.can_proceed());
        assert_eq!(limiter.remaining_operations(), 0);
        assert!(limiter.time_until_next_slot() > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_free_as_window_slides() {
        let mut limiter = SlidingWindowLimiter::new(2, Duration::from_millis(100));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(101)).await;

        assert!(limiter.can_proceed());
        assert_eq!(limiter.remaining_operations(), 2);
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_next_slot_tracks_oldest() {
        let mut limiter = SlidingWindowLimiter::new(1, Duration::from_millis(100));
        assert!(limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(40)).await;
        let wait = limiter.time_until_next_slot();
        assert_eq!(wait, Duration::from_millis(60));

        tokio::time::advance(wait).await;
        assert!(limiter.can_proceed());
    }
}
