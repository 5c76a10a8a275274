use std::time::Duration;

/// Statuses treated as transient and retried with backoff.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// How a non-success status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Fatal,
}

pub fn classify_status(status: u16) -> StatusClass {
    if (200..300).contains(&status) {
        StatusClass::Success
    } else if RETRYABLE_STATUSES.contains(&status) {
        StatusClass::Retryable
    } else {
        StatusClass::Fatal
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    classify_status(status) == StatusClass::Retryable
}

/// Delay slept after failed attempt `attempt` (1-indexed): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30);
    base.saturating_mul(2u32.saturating_pow(exponent))
}
