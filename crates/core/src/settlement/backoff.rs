//! Retry backoff for settlement jobs.

/// Exponential backoff in seconds with cap.
pub fn backoff_seconds(consecutive_failures: i32) -> i64 {
    const MAX_EXPONENT: i32 = 8;
    const BASE_DELAY_SECONDS: i64 = 5;

    let capped = consecutive_failures.clamp(0, MAX_EXPONENT);
    2_i64.pow(capped as u32) * BASE_DELAY_SECONDS
}
