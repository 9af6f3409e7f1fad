use std::time::Duration;

/// Exponential backoff: `min(base * 2^(attempt-1), cap)`.
///
/// `base` is at least 1ms and `cap` is never below `base`. Attempt `0` is
/// treated as the first attempt.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let base = base.max(Duration::from_millis(1));
    let cap = cap.max(base);
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(200, 1, 30_000, 200)]
    #[case(200, 2, 30_000, 400)]
    #[case(200, 3, 30_000, 800)]
    #[case(200, 10, 30_000, 30_000)]
    #[case(0, 1, 30_000, 1)]
    #[case(0, 4, 30_000, 8)]
    #[case(5_000, 1, 1_000, 5_000)]
    #[case(1_000, 0, 10_000, 1_000)]
    #[case(1_000, 200, 10_000, 10_000)]
    fn delay_table(
        #[case] base_ms: u64,
        #[case] attempt: u32,
        #[case] cap_ms: u64,
        #[case] expected_ms: u64,
    ) {
        let delay = backoff_delay(
            Duration::from_millis(base_ms),
            attempt,
            Duration::from_millis(cap_ms),
        );
        assert_eq!(delay, Duration::from_millis(expected_ms));
    }
}
