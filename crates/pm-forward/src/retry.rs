use std::time::Duration;

/// Backoff used for the §7 "connection reset" single retry. Short enough
/// that a transient reset doesn't stall the caller, long enough to let a
/// backend that just dropped the connection accept a new one.
pub const RESET_RETRY_DELAY: Duration = Duration::from_millis(200);

/// What the caller-supplied retry policy decides after one attempt (§4.2
/// "Retry policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn give_up() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }

    pub fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }
}

/// `(status_code, error_message, attempt_number)` → decision. `status_code`
/// is `None` for a transport-level failure with no HTTP response at all.
pub type RetryPolicy = dyn Fn(Option<u16>, &str, u32) -> RetryDecision + Send + Sync;

/// A retry policy good for the §7 "connection reset" case: one retry with a
/// short fixed backoff, nothing else.
pub fn single_retry_on_reset(delay: Duration) -> impl Fn(Option<u16>, &str, u32) -> RetryDecision + Send + Sync {
    move |status, message, attempt| {
        if attempt > 1 {
            return RetryDecision::give_up();
        }
        let looks_like_reset = status.is_none() && message.to_lowercase().contains("reset");
        if looks_like_reset {
            RetryDecision::retry_after(delay)
        } else {
            RetryDecision::give_up()
        }
    }
}

/// A retry policy for the "missing secret for id" crypto class (§7), which
/// the adapter re-arms with a forced secret refresh between the failed
/// attempt and the retry.
pub fn single_retry_on_status(status_code: u16, delay: Duration) -> impl Fn(Option<u16>, &str, u32) -> RetryDecision + Send + Sync {
    move |status, _message, attempt| {
        if attempt > 1 {
            return RetryDecision::give_up();
        }
        match status {
            Some(s) if s == status_code => RetryDecision::retry_after(delay),
            _ => RetryDecision::give_up(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_retry_on_reset_fires_once_then_gives_up() {
        let policy = single_retry_on_reset(Duration::from_millis(10));
        assert!(policy(None, "connection reset by peer", 1).should_retry);
        assert!(!policy(None, "connection reset by peer", 2).should_retry);
        assert!(!policy(Some(400), "bad request", 1).should_retry);
    }

    #[test]
    fn single_retry_on_status_matches_configured_code_only() {
        let policy = single_retry_on_status(409, Duration::from_millis(5));
        assert!(policy(Some(409), "no secret for id", 1).should_retry);
        assert!(!policy(Some(500), "internal error", 1).should_retry);
        assert!(!policy(Some(409), "no secret for id", 2).should_retry);
    }
}
