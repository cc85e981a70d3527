use std::fmt;

use crate::CancelReason;

/// Error type returned by this crate.
///
/// A response with a non-retryable status (404, 422, ...) is not an error; it
/// is returned to the caller as a normal response.
#[derive(Debug, thiserror::Error)]
pub enum ResilientError {
    /// Empty method or URL. No attempt was made.
    #[error("{0}")]
    Validation(String),
    /// The request body source could not be read.
    #[error("failed to read request body: {0}")]
    Body(#[source] std::io::Error),
    /// The underlying request could not be built. Not retried.
    #[error("failed to create request: {0}")]
    Request(String),
    /// Network, client construction or body read error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The caller's context ended during a request or a retry wait.
    #[error("context cancelled during retry: {0}")]
    Cancelled(CancelReason),
    /// Every configured attempt was consumed.
    #[error(transparent)]
    RetryExhausted(#[from] RetryExhaustedError),
}

impl ResilientError {
    /// Returns `true` for [`ResilientError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Last failure seen before retries ran out.
#[derive(Debug)]
pub enum LastError {
    /// The final attempt failed at the transport level.
    Transport(reqwest::Error),
    /// The final attempt produced a retryable status and no transport error.
    Unknown { attempts: usize },
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::Unknown { attempts } => write!(f, "unknown error after {attempts} attempts"),
        }
    }
}

/// Returned when all retry attempts are exhausted.
#[derive(Debug, thiserror::Error)]
#[error(
    "retry exhausted after {attempts} attempts for {method} {url}: HTTP {last_status}: {last_error}"
)]
pub struct RetryExhaustedError {
    pub last_error: LastError,
    /// Status of the last response, `0` when no response was ever received.
    pub last_status: u16,
    pub attempts: usize,
    pub url: String,
    pub method: String,
}
