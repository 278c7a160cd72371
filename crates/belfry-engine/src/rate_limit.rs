use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window submission limiter for the scheduling API.
///
/// A capacity of 0 disables limiting.
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            window: Duration::from_secs(60),
            hits: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one submission if the window has room. Returns false when the
    /// caller should be rejected with a throttling error.
    pub fn try_acquire(&self) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        while let Some(front) = hits.front() {
            if now.duration_since(*front) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }
        if hits.len() >= self.capacity as usize {
            return false;
        }
        hits.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_excess_within_window() {
        let limiter = RateLimiter::per_minute(3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        // The (N+1)th submission inside the window is throttled.
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn zero_capacity_means_unlimited() {
        let limiter = RateLimiter::per_minute(0);
        for _ in 0..1000 {
            assert!(limiter.try_acquire());
        }
    }
}
