use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, Response, Url,
};
use tokio::time::sleep;

use crate::{
    backoff::{is_rate_limited, Backoff},
    error::LastError,
    hooks::Hooks,
    retry::RetryPolicy,
    transport::build_http_client,
    ClientOptions, Context, OptionsOverride, RequestOptions, ResilientError, Result,
    RetryExhaustedError,
};

#[derive(Clone)]
/// HTTP client that retries failed requests with exponential backoff.
///
/// Clones share the connection pool and the hook slots: a hook replaced
/// through one clone is used by every clone for subsequent requests.
pub struct ResilientClient {
    http: reqwest::Client,
    options: Arc<ClientOptions>,
    retry_policy: Arc<RetryPolicy>,
    hooks: Arc<RwLock<Hooks>>,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("options", &self.options)
            .field("hooks", &"<fn>")
            .finish()
    }
}

impl ResilientClient {
    /// Creates a client with [`ClientOptions::default`].
    pub fn new() -> Result<Self> {
        Self::with_options(ClientOptions::default())
    }

    /// Creates a client from defaults overlaid with `overrides`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use resilient_http::{OptionsOverride, ResilientClient};
    ///
    /// let client = ResilientClient::with_override(&OptionsOverride {
    ///     max_retries: 2,
    ///     initial_wait: Duration::from_millis(100),
    ///     force_http2: true,
    ///     ..OptionsOverride::default()
    /// })
    /// .expect("client must build");
    /// ```
    pub fn with_override(overrides: &OptionsOverride) -> Result<Self> {
        Self::with_options(ClientOptions::from_override(overrides))
    }

    /// Creates a client from fully resolved options.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        let http = build_http_client(&options)?;
        let retry_policy = RetryPolicy::new(options.retry_on_status.clone());
        let hooks = Hooks::logging(options.max_retries, options.initial_wait);

        Ok(Self {
            http,
            options: Arc::new(options),
            retry_policy: Arc::new(retry_policy),
            hooks: Arc::new(RwLock::new(hooks)),
        })
    }

    /// Returns the resolved options this client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Replaces the hook called before each retry.
    ///
    /// Requests already in flight may still observe the previous hook.
    pub fn set_retry_hook<F>(&self, hook: F)
    where
        F: Fn(usize, Option<&Response>, Option<&reqwest::Error>) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retry = Arc::new(hook);
    }

    /// Replaces the hook called when a request completes without retry.
    pub fn set_success_hook<F>(&self, hook: F)
    where
        F: Fn(&Response, &RequestOptions) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .success = Arc::new(hook);
    }

    /// Whether an attempt outcome would be retried by this client.
    pub fn should_retry(&self, outcome: &std::result::Result<Response, reqwest::Error>) -> bool {
        self.retry_policy.should_retry(outcome)
    }

    /// Sends a `GET` request with retries.
    pub async fn get(&self, ctx: &Context, url: &str, headers: &[(&str, &str)]) -> Result<Response> {
        self.send(request_options(Method::GET, ctx, url, None, headers))
            .await
    }

    /// Sends a `POST` request with `body`, replayed on every retry.
    pub async fn post(
        &self,
        ctx: &Context,
        url: &str,
        body: impl Into<Bytes>,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        self.send(request_options(Method::POST, ctx, url, Some(body.into()), headers))
            .await
    }

    /// Sends a `PUT` request with `body`, replayed on every retry.
    pub async fn put(
        &self,
        ctx: &Context,
        url: &str,
        body: impl Into<Bytes>,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        self.send(request_options(Method::PUT, ctx, url, Some(body.into()), headers))
            .await
    }

    /// Sends a `PATCH` request with `body`, replayed on every retry.
    pub async fn patch(
        &self,
        ctx: &Context,
        url: &str,
        body: impl Into<Bytes>,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        self.send(request_options(Method::PATCH, ctx, url, Some(body.into()), headers))
            .await
    }

    /// Sends a `DELETE` request with retries.
    pub async fn delete(
        &self,
        ctx: &Context,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        self.send(request_options(Method::DELETE, ctx, url, None, headers))
            .await
    }

    /// Sends a request, retrying transport errors and retryable statuses.
    ///
    /// Any response whose status is outside the retryable set is returned as
    /// `Ok`, including 4xx and 5xx. Errors are validation, request
    /// construction, cancellation and retry exhaustion.
    pub async fn send(&self, opts: RequestOptions) -> Result<Response> {
        if opts.method.is_empty() {
            return Err(ResilientError::Validation("method cannot be empty".to_owned()));
        }
        if opts.url.is_empty() {
            return Err(ResilientError::Validation("URL cannot be empty".to_owned()));
        }

        let ctx = opts.context.clone().unwrap_or_default();
        let max_retries = self.options.max_retries;

        tracing::debug!(
            method = %opts.method,
            url = %opts.url,
            max_retries,
            "starting HTTP request"
        );

        let mut backoff = Backoff::new(self.options.initial_wait, self.options.max_wait);
        let mut last = None;

        for attempt in 0..=max_retries {
            let request = self.build_request(&opts, attempt)?;

            let outcome = tokio::select! {
                biased;
                reason = ctx.done() => {
                    tracing::warn!(
                        method = %opts.method,
                        url = %opts.url,
                        attempt = attempt + 1,
                        %reason,
                        "request cancelled"
                    );
                    return Err(ResilientError::Cancelled(reason));
                }
                outcome = self.http.execute(request) => outcome,
            };

            let outcome = match outcome {
                Ok(response) if !self.retry_policy.should_retry_status(response.status()) => {
                    let on_success = self.hooks().success;
                    on_success(&response, &opts);
                    return Ok(response);
                }
                other => other,
            };

            if attempt >= max_retries {
                last = Some(outcome);
                break;
            }

            let on_retry = self.hooks().retry;
            on_retry(attempt, outcome.as_ref().ok(), outcome.as_ref().err());

            let rate_limited = match &outcome {
                Ok(response) if is_rate_limited(response.status()) => {
                    tracing::warn!(
                        status = response.status().as_u16(),
                        url = %opts.url,
                        "received 429 Too Many Requests"
                    );
                    Some(response.headers())
                }
                _ => None,
            };
            let wait = backoff.wait_for(rate_limited);
            drop(outcome);

            tracing::info!(wait_ms = wait.as_millis() as u64, "waiting before next retry");
            tokio::select! {
                biased;
                reason = ctx.done() => {
                    tracing::warn!(%reason, "request cancelled during retry wait");
                    return Err(ResilientError::Cancelled(reason));
                }
                () = sleep(wait) => backoff.advance(),
            }
        }

        Err(self.exhausted(&opts, last))
    }

    fn hooks(&self) -> Hooks {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn build_request(&self, opts: &RequestOptions, attempt: usize) -> Result<reqwest::Request> {
        self.try_build_request(opts).map_err(|message| {
            tracing::error!(
                error = %message,
                method = %opts.method,
                url = %opts.url,
                attempt = attempt + 1,
                "failed to create request"
            );
            ResilientError::Request(message)
        })
    }

    fn try_build_request(&self, opts: &RequestOptions) -> std::result::Result<reqwest::Request, String> {
        let method = Method::from_bytes(opts.method.as_bytes())
            .map_err(|err| format!("invalid method '{}': {err}", opts.method))?;
        let url =
            Url::parse(&opts.url).map_err(|err| format!("invalid URL '{}': {err}", opts.url))?;

        let mut headers = HeaderMap::with_capacity(opts.headers.len());
        for (name, value) in &opts.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| format!("invalid header name '{name}': {err}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|err| format!("invalid value for header '{name}': {err}"))?;
            headers.insert(header_name, header_value);
        }

        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(body) = &opts.body {
            builder = builder.body(body.clone());
        }
        builder.build().map_err(|err| err.to_string())
    }

    fn exhausted(
        &self,
        opts: &RequestOptions,
        last: Option<std::result::Result<Response, reqwest::Error>>,
    ) -> ResilientError {
        let attempts = self.options.max_retries.saturating_add(1);
        let (last_status, last_error) = match last {
            Some(Ok(response)) => (response.status().as_u16(), LastError::Unknown { attempts }),
            Some(Err(err)) => (0, LastError::Transport(err)),
            None => (0, LastError::Unknown { attempts }),
        };

        tracing::error!(
            method = %opts.method,
            url = %opts.url,
            retries = self.options.max_retries,
            status = last_status,
            error = %last_error,
            "request failed after all retries"
        );

        RetryExhaustedError {
            last_error,
            last_status,
            attempts,
            url: opts.url.clone(),
            method: opts.method.clone(),
        }
        .into()
    }
}

fn request_options(
    method: Method,
    ctx: &Context,
    url: &str,
    body: Option<Bytes>,
    headers: &[(&str, &str)],
) -> RequestOptions {
    RequestOptions {
        method: method.as_str().to_owned(),
        url: url.to_owned(),
        body,
        headers: headers
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect(),
        context: Some(ctx.clone()),
    }
}
