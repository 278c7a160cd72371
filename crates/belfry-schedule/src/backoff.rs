//! Retry back-off arithmetic.

use std::time::Duration;

use belfry_core::types::{RetryPolicy, RetryStrategy};

/// Delay before retry `attempt` (1-based). Clamped to `[0, max_delay]`.
///
/// Saturating arithmetic throughout: a large attempt number yields
/// `max_delay`, never a wrapped small value.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let attempt = attempt.max(1) as u64;
    let initial = policy.initial_delay_secs;

    let raw = match policy.strategy {
        RetryStrategy::Fixed => initial,
        RetryStrategy::Linear => initial.saturating_mul(attempt),
        RetryStrategy::Exponential => {
            let factor = 1u64.checked_shl((attempt - 1).min(63) as u32).unwrap_or(u64::MAX);
            initial.saturating_mul(factor)
        }
        RetryStrategy::Fibonacci => initial.saturating_mul(fib(attempt)),
    };

    Duration::from_secs(raw.min(policy.max_delay_secs))
}

/// fib(1) = fib(2) = 1. Overflow saturates to u64::MAX, which the caller
/// clamps to `max_delay` anyway.
fn fib(n: u64) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n <= 2 {
        1
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: RetryStrategy, initial: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            strategy,
            initial_delay_secs: initial,
            max_delay_secs: max,
            max_attempts: 10,
        }
    }

    #[test]
    fn fixed_is_constant() {
        let p = policy(RetryStrategy::Fixed, 5, 600);
        for attempt in 1..=8 {
            assert_eq!(retry_delay(&p, attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn linear_scales_with_attempt() {
        let p = policy(RetryStrategy::Linear, 3, 600);
        assert_eq!(retry_delay(&p, 1), Duration::from_secs(3));
        assert_eq!(retry_delay(&p, 2), Duration::from_secs(6));
        assert_eq!(retry_delay(&p, 5), Duration::from_secs(15));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        // initial 1s, max 30s → 1, 2, 4, …, 30, 30.
        let p = policy(RetryStrategy::Exponential, 1, 30);
        assert_eq!(retry_delay(&p, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(&p, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(&p, 3), Duration::from_secs(4));
        assert_eq!(retry_delay(&p, 6), Duration::from_secs(30));
        assert_eq!(retry_delay(&p, 60), Duration::from_secs(30));
    }

    #[test]
    fn fibonacci_sequence() {
        let p = policy(RetryStrategy::Fibonacci, 2, 1000);
        // fib: 1 1 2 3 5 8
        assert_eq!(retry_delay(&p, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(&p, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(&p, 3), Duration::from_secs(4));
        assert_eq!(retry_delay(&p, 4), Duration::from_secs(6));
        assert_eq!(retry_delay(&p, 5), Duration::from_secs(10));
        assert_eq!(retry_delay(&p, 6), Duration::from_secs(16));
    }

    #[test]
    fn monotone_non_decreasing_and_bounded() {
        for strategy in [
            RetryStrategy::Fixed,
            RetryStrategy::Linear,
            RetryStrategy::Exponential,
            RetryStrategy::Fibonacci,
        ] {
            let p = policy(strategy, 2, 120);
            let mut prev = Duration::ZERO;
            for attempt in 1..=40 {
                let d = retry_delay(&p, attempt);
                assert!(d >= prev, "{strategy:?} decreased at attempt {attempt}");
                assert!(d <= Duration::from_secs(120), "{strategy:?} exceeded max_delay");
                prev = d;
            }
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let p = policy(RetryStrategy::Exponential, u64::MAX / 2, 60);
        assert_eq!(retry_delay(&p, u32::MAX), Duration::from_secs(60));
        let p = policy(RetryStrategy::Fibonacci, 1000, 90);
        assert_eq!(retry_delay(&p, 500), Duration::from_secs(90));
    }
}
