use std::time::Duration;

/// Pause between two fanout rounds for a given number of tracked keys: the interval doubles with
///  every decimal order of magnitude of the key count, so that the number of verification script
///  invocations per second stays bounded as the number of keys grows.
pub fn scaled_interval(num_keys: usize, min_interval: Duration, max_interval: Duration) -> Duration {
    let n = num_keys.max(2) as u64;
    // ceil(log10(n)) for n >= 2
    let exponent = (n - 1).ilog10() + 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);

    min_interval.saturating_mul(factor)
        .min(max_interval)
}
