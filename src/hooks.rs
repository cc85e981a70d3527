use std::{fmt, sync::Arc, time::Duration};

use reqwest::Response;

use crate::RequestOptions;

/// Called before every retry with the zero-based index of the failed attempt
/// and whatever that attempt produced.
pub type RetryHook = Arc<dyn Fn(usize, Option<&Response>, Option<&reqwest::Error>) + Send + Sync>;

/// Called once when a request finishes with a non-retryable response.
pub type SuccessHook = Arc<dyn Fn(&Response, &RequestOptions) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Hooks {
    pub retry: RetryHook,
    pub success: SuccessHook,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("retry", &"<fn>")
            .field("success", &"<fn>")
            .finish()
    }
}

impl Hooks {
    /// Logging hooks bound to the client's retry settings.
    pub fn logging(max_retries: usize, initial_wait: Duration) -> Self {
        Self {
            retry: default_retry_hook(max_retries, initial_wait),
            success: default_success_hook(),
        }
    }
}

fn default_retry_hook(max_retries: usize, initial_wait: Duration) -> RetryHook {
    Arc::new(move |attempt, response, error| {
        let initial_wait_ms = initial_wait.as_millis() as u64;
        match (response, error) {
            (_, Some(err)) => tracing::warn!(
                attempt = attempt + 1,
                max = max_retries,
                initial_wait_ms,
                error = %err,
                "request failed, retrying"
            ),
            (Some(response), None) => tracing::warn!(
                attempt = attempt + 1,
                max = max_retries,
                initial_wait_ms,
                status = response.status().as_u16(),
                "request failed, retrying"
            ),
            (None, None) => tracing::warn!(
                attempt = attempt + 1,
                max = max_retries,
                initial_wait_ms,
                "request failed, retrying"
            ),
        }
    })
}

fn default_success_hook() -> SuccessHook {
    Arc::new(|response, options| {
        tracing::info!(
            method = %options.method,
            url = %options.url,
            status = response.status().as_u16(),
            "request completed successfully"
        );
    })
}
