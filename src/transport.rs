use crate::{ClientOptions, ResilientError, Result};

/// Builds the pooled `reqwest` client shared by every request of a
/// [`ResilientClient`](crate::ResilientClient).
///
/// `max_idle_conns` and `expect_continue_timeout` have no `reqwest`
/// counterpart; reqwest caps idle connections per host only and never sends
/// `Expect: 100-continue`.
pub(crate) fn build_http_client(options: &ClientOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(options.timeout)
        .pool_max_idle_per_host(options.max_idle_conns_per_host)
        .pool_idle_timeout(options.idle_conn_timeout)
        .connect_timeout(options.tls_handshake_timeout)
        .read_timeout(options.response_header_timeout);

    if !options.force_http2 {
        builder = builder.http1_only();
    }
    if options.disable_compression {
        builder = builder.no_gzip().no_brotli();
    }

    builder.build().map_err(ResilientError::Transport)
}
