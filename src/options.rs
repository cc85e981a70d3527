use std::time::Duration;

/// Status codes retried by default: 408, 429, 500, 502, 503 and 504.
pub const DEFAULT_RETRY_ON_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Fully resolved transport and retry configuration.
///
/// Built once when a client is constructed and never mutated afterwards, so it
/// can be read by any number of in-flight requests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Overall timeout for a single attempt, including reading the body.
    pub timeout: Duration,
    /// Maximum idle connections across all hosts.
    ///
    /// Not applied: the reqwest pool only caps idle connections per host.
    pub max_idle_conns: usize,
    /// Maximum idle connections kept per host.
    pub max_idle_conns_per_host: usize,
    /// How long an idle pooled connection is kept alive.
    pub idle_conn_timeout: Duration,
    /// Timeout for establishing a connection, TLS handshake included.
    pub tls_handshake_timeout: Duration,
    /// Wait for a `100 Continue` before sending the body.
    ///
    /// Not applied: reqwest never sends `Expect: 100-continue`.
    pub expect_continue_timeout: Duration,
    /// Timeout for waiting on the server's response headers.
    pub response_header_timeout: Duration,
    /// Disables transparent gzip/brotli decompression.
    pub disable_compression: bool,
    /// Negotiates HTTP/2 when the server supports it. `false` pins HTTP/1.1.
    pub force_http2: bool,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Wait before the first retry.
    pub initial_wait: Duration,
    /// Ceiling for the computed backoff. `Retry-After` may exceed it.
    pub max_wait: Duration,
    /// Response status codes that trigger a retry.
    pub retry_on_status: Vec<u16>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            max_idle_conns: 100,
            max_idle_conns_per_host: 20,
            idle_conn_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(30),
            expect_continue_timeout: Duration::from_secs(1),
            response_header_timeout: Duration::from_secs(60),
            disable_compression: false,
            force_http2: true,
            max_retries: 5,
            initial_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
            retry_on_status: DEFAULT_RETRY_ON_STATUS.to_vec(),
        }
    }
}

impl ClientOptions {
    /// Overlays `overrides` on `defaults`.
    ///
    /// Zero durations, zero counts and an empty status list keep the default.
    /// Booleans always come from the override once one is given. Values are
    /// not validated.
    pub fn resolve(defaults: ClientOptions, overrides: Option<&OptionsOverride>) -> Self {
        let Some(o) = overrides else {
            return defaults;
        };

        Self {
            timeout: pick_duration(o.timeout, defaults.timeout),
            max_idle_conns: pick_count(o.max_idle_conns, defaults.max_idle_conns),
            max_idle_conns_per_host: pick_count(
                o.max_idle_conns_per_host,
                defaults.max_idle_conns_per_host,
            ),
            idle_conn_timeout: pick_duration(o.idle_conn_timeout, defaults.idle_conn_timeout),
            tls_handshake_timeout: pick_duration(
                o.tls_handshake_timeout,
                defaults.tls_handshake_timeout,
            ),
            expect_continue_timeout: pick_duration(
                o.expect_continue_timeout,
                defaults.expect_continue_timeout,
            ),
            response_header_timeout: pick_duration(
                o.response_header_timeout,
                defaults.response_header_timeout,
            ),
            disable_compression: o.disable_compression,
            force_http2: o.force_http2,
            max_retries: pick_count(o.max_retries, defaults.max_retries),
            initial_wait: pick_duration(o.initial_wait, defaults.initial_wait),
            max_wait: pick_duration(o.max_wait, defaults.max_wait),
            retry_on_status: if o.retry_on_status.is_empty() {
                defaults.retry_on_status
            } else {
                o.retry_on_status.clone()
            },
        }
    }

    /// Overlays `overrides` on [`ClientOptions::default`].
    pub fn from_override(overrides: &OptionsOverride) -> Self {
        Self::resolve(Self::default(), Some(overrides))
    }
}

fn pick_duration(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

fn pick_count(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

/// Partial configuration. Zero-valued fields fall back to the defaults.
///
/// Note that `OptionsOverride::default()` has both booleans set to `false`,
/// so supplying it turns HTTP/2 negotiation off.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OptionsOverride {
    pub timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub response_header_timeout: Duration,
    pub disable_compression: bool,
    pub force_http2: bool,
    pub max_retries: usize,
    pub initial_wait: Duration,
    pub max_wait: Duration,
    pub retry_on_status: Vec<u16>,
}

impl OptionsOverride {
    /// Reads an override from environment variables.
    ///
    /// Reads:
    /// - `RESILIENT_HTTP_TIMEOUT_MS`
    /// - `RESILIENT_HTTP_MAX_RETRIES`
    /// - `RESILIENT_HTTP_INITIAL_WAIT_MS`
    /// - `RESILIENT_HTTP_MAX_WAIT_MS`
    /// - `RESILIENT_HTTP_RETRY_ON_STATUS`: comma-separated, e.g. `429,503`
    ///
    /// Unset variables leave the field at zero so the default applies.
    /// `force_http2` is set to `true` to match the default transport.
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> std::result::Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| -> std::result::Result<Duration, String> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|err| format!("invalid {name}: {err}")),
                None => Ok(Duration::ZERO),
            }
        };

        let max_retries = match lookup("RESILIENT_HTTP_MAX_RETRIES") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|err| format!("invalid RESILIENT_HTTP_MAX_RETRIES: {err}"))?,
            None => 0,
        };

        let retry_on_status = match lookup("RESILIENT_HTTP_RETRY_ON_STATUS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| {
                    code.parse::<u16>().map_err(|err| {
                        format!("invalid RESILIENT_HTTP_RETRY_ON_STATUS entry '{code}': {err}")
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            timeout: millis("RESILIENT_HTTP_TIMEOUT_MS")?,
            max_retries,
            initial_wait: millis("RESILIENT_HTTP_INITIAL_WAIT_MS")?,
            max_wait: millis("RESILIENT_HTTP_MAX_WAIT_MS")?,
            retry_on_status,
            force_http2: true,
            ..Self::default()
        })
    }
}
