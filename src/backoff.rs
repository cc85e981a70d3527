use std::time::Duration;

use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    StatusCode,
};

use crate::rnd::Rnd;

/// Wait applied to a 429 response without a usable `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

const GROWTH_FACTOR: f64 = 1.5;
const JITTER_FACTOR: f64 = 0.1;

/// Per-call backoff state.
///
/// `current` starts at the configured initial wait and grows by 1.5x after
/// every completed wait, capped at `max_wait`.
#[derive(Debug)]
pub(crate) struct Backoff {
    current: Duration,
    max_wait: Duration,
    rnd: Rnd,
}

impl Backoff {
    pub fn new(initial_wait: Duration, max_wait: Duration) -> Self {
        Self {
            current: initial_wait,
            max_wait,
            rnd: Rnd::default(),
        }
    }

    #[cfg(test)]
    fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    #[cfg(test)]
    fn current(&self) -> Duration {
        self.current
    }

    /// Current wait plus up to 10% jitter.
    ///
    /// Never exceeds `max_wait` unless the current wait already does, which
    /// only happens when the initial wait was configured above the ceiling.
    pub fn jittered(&self) -> Duration {
        let jitter = self.current.mul_f64(self.rnd.next_f64() * JITTER_FACTOR);
        let ceiling = self.max_wait.max(self.current);
        self.current.saturating_add(jitter).min(ceiling)
    }

    /// Wait before the next attempt, given the status of the failed one.
    ///
    /// A 429 can only extend the wait, and may push it past `max_wait`.
    pub fn wait_for(&self, rate_limited: Option<&HeaderMap>) -> Duration {
        let wait = self.jittered();
        match rate_limited {
            Some(headers) => {
                let rate_limit_wait = retry_after(headers);
                tracing::info!(
                    wait_ms = rate_limit_wait.as_millis() as u64,
                    "respecting Retry-After header wait time"
                );
                wait.max(rate_limit_wait)
            }
            None => wait,
        }
    }

    /// Grows the current wait for the following attempt.
    pub fn advance(&mut self) {
        self.current = grow(self.current, self.max_wait);
    }
}

/// `min(current * 1.5, max_wait)`, saturating instead of overflowing.
pub(crate) fn grow(current: Duration, max_wait: Duration) -> Duration {
    Duration::try_from_secs_f64(current.as_secs_f64() * GROWTH_FACTOR)
        .unwrap_or(Duration::MAX)
        .min(max_wait)
}

/// Parses `Retry-After` as whole seconds.
///
/// Missing, HTTP-date or otherwise unparsable values fall back to
/// [`DEFAULT_RATE_LIMIT_WAIT`].
pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
}

pub(crate) fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}
