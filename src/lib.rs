//! `resilient-http` is an async HTTP client that retries failed requests.
//!
//! Every request goes through [`ResilientClient::send`] (or one of the
//! method shortcuts such as [`ResilientClient::get`]):
//! - transport errors and retryable statuses (408, 429, 500, 502, 503, 504 by
//!   default) are retried up to `max_retries` times;
//! - the wait between attempts grows by 1.5x with up to 10% jitter, capped at
//!   `max_wait`;
//! - a 429 waits at least as long as its `Retry-After` header asks;
//! - a [`Context`] cancels the request and any pending retry wait.

mod backoff;
mod client;
mod context;
mod error;
mod hooks;
mod options;
mod request;
mod response;
mod retry;
mod rnd;
mod transport;

pub use backoff::DEFAULT_RATE_LIMIT_WAIT;
pub use client::ResilientClient;
pub use context::{CancelHandle, CancelReason, Context};
pub use error::{LastError, ResilientError, RetryExhaustedError};
pub use hooks::{RetryHook, SuccessHook};
pub use options::{ClientOptions, OptionsOverride, DEFAULT_RETRY_ON_STATUS};
pub use request::RequestOptions;
pub use retry::RetryPolicy;

pub type Result<T> = std::result::Result<T, ResilientError>;
