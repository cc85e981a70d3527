use reqwest::{Response, StatusCode};

/// Decides whether a completed attempt should be retried.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    retry_on_status: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(retry_on_status: impl Into<Vec<u16>>) -> Self {
        Self {
            retry_on_status: retry_on_status.into(),
        }
    }

    /// Transport errors are always retried. Responses are retried only when
    /// their status is in the configured set.
    pub fn should_retry(&self, outcome: &Result<Response, reqwest::Error>) -> bool {
        match outcome {
            Ok(response) => self.should_retry_status(response.status()),
            Err(_) => true,
        }
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_on_status.contains(&status.as_u16())
    }
}
