use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use resilient_http::{
    CancelReason, ClientOptions, Context, LastError, OptionsOverride, RequestOptions,
    ResilientClient, ResilientError,
};
use serde::Deserialize;
use tracing_test::traced_test;

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    headers: Vec<(&'static str, &'static str)>,
    body: String,
    delay: Duration,
}

impl MockResponse {
    fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
            delay: Duration::from_millis(0),
        }
    }

    fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct Observed {
    method: Method,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    fallback: MockResponse,
    hits: Arc<AtomicUsize>,
    observed: Arc<Mutex<Vec<Observed>>>,
}

async fn handler(
    State(state): State<MockState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .observed
        .lock()
        .expect("observed mutex must not be poisoned")
        .push(Observed {
            method,
            headers,
            body,
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| state.fallback.clone())
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    (response.status, headers, response.body)
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    observed: Arc<Mutex<Vec<Observed>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn url(&self) -> String {
        format!("{}/resource", self.base_url)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn observed(&self) -> Vec<Observed> {
        self.observed
            .lock()
            .expect("observed mutex must not be poisoned")
            .clone()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    spawn_server_with_fallback(
        responses,
        MockResponse::status(StatusCode::INTERNAL_SERVER_ERROR).body("no mock response available"),
    )
    .await
}

async fn spawn_server_with_fallback(
    responses: Vec<MockResponse>,
    fallback: MockResponse,
) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        fallback,
        hits: Arc::new(AtomicUsize::new(0)),
        observed: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/resource", any(handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        observed: state.observed,
        task,
    }
}

fn fast_client(max_retries: usize) -> ResilientClient {
    ResilientClient::with_override(&OptionsOverride {
        max_retries,
        initial_wait: Duration::from_millis(10),
        max_wait: Duration::from_millis(50),
        force_http2: true,
        ..OptionsOverride::default()
    })
    .expect("client must build")
}

#[tokio::test]
async fn get_returns_response_and_runs_success_hook() {
    let server = spawn_server(vec![MockResponse::status(StatusCode::OK)
        .header("x-request-id", "abc-123")
        .body("hello")])
    .await;
    let client = fast_client(3);

    let successes = Arc::new(AtomicUsize::new(0));
    let counter = successes.clone();
    client.set_success_hook(move |response, options| {
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(options.method, "GET");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let response = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect("get must succeed");

    assert!(client.is_success(&response));
    assert_eq!(client.header(&response, "X-Request-ID"), Some("abc-123"));
    assert_eq!(client.header(&response, "x-missing"), None);
    let body = client.read_body(response).await.expect("body must read");
    assert_eq!(&body[..], b"hello");
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn non_retryable_error_status_is_returned_as_response() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::NOT_FOUND),
        MockResponse::status(StatusCode::OK),
    ])
    .await;
    let client = fast_client(3);

    let response = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect("404 is a response, not an error");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!client.is_success(&response));
    client.close_response(Some(response));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn retries_server_errors_until_success() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::INTERNAL_SERVER_ERROR),
        MockResponse::status(StatusCode::INTERNAL_SERVER_ERROR),
        MockResponse::status(StatusCode::OK),
    ])
    .await;
    let client = fast_client(2);

    let retries = Arc::new(Mutex::new(Vec::new()));
    let seen = retries.clone();
    client.set_retry_hook(move |attempt, response, error| {
        assert!(error.is_none());
        seen.lock()
            .expect("retry log mutex must not be poisoned")
            .push((attempt, response.map(|r| r.status())));
    });

    let response = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect("request must succeed after retries");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.hits(), 3);
    assert_eq!(
        *retries.lock().expect("retry log mutex must not be poisoned"),
        vec![
            (0, Some(StatusCode::INTERNAL_SERVER_ERROR)),
            (1, Some(StatusCode::INTERNAL_SERVER_ERROR)),
        ]
    );
}

#[tokio::test]
async fn exhausted_retries_report_attempts_and_last_status() {
    let server = spawn_server(Vec::new()).await;
    let client = fast_client(1);

    let retry_calls = Arc::new(AtomicUsize::new(0));
    let counter = retry_calls.clone();
    client.set_retry_hook(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect_err("always-500 must exhaust retries");

    match err {
        ResilientError::RetryExhausted(exhausted) => {
            assert_eq!(exhausted.attempts, 2);
            assert_eq!(exhausted.last_status, 500);
            assert_eq!(exhausted.method, "GET");
            assert_eq!(exhausted.url, server.url());
            assert!(matches!(exhausted.last_error, LastError::Unknown { attempts: 2 }));
            assert_eq!(
                exhausted.last_error.to_string(),
                "unknown error after 2 attempts"
            );
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
    assert_eq!(server.hits(), 2);
    assert_eq!(retry_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_after_header_extends_the_wait() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::TOO_MANY_REQUESTS).header("retry-after", "1"),
        MockResponse::status(StatusCode::OK),
    ])
    .await;
    let client = fast_client(1);

    let start = Instant::now();
    let response = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect("request must succeed after rate limit");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn empty_method_or_url_fails_without_network_calls() {
    let server = spawn_server(vec![MockResponse::status(StatusCode::OK)]).await;
    let client = fast_client(1);

    let err = client
        .send(RequestOptions::new("", server.url()))
        .await
        .expect_err("empty method must fail");
    assert!(matches!(err, ResilientError::Validation(_)));
    assert_eq!(err.to_string(), "method cannot be empty");

    let err = client
        .get(&Context::background(), "", &[])
        .await
        .expect_err("empty URL must fail");
    assert!(matches!(err, ResilientError::Validation(_)));
    assert_eq!(err.to_string(), "URL cannot be empty");

    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn invalid_method_is_a_request_construction_error() {
    let server = spawn_server(vec![MockResponse::status(StatusCode::OK)]).await;
    let client = fast_client(3);

    let err = client
        .send(RequestOptions::new("BAD METHOD", server.url()))
        .await
        .expect_err("method with a space must fail");

    assert!(matches!(err, ResilientError::Request(_)));
    assert!(err.to_string().starts_with("failed to create request"));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn cancel_during_in_flight_request_returns_cancellation() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::OK).with_delay(Duration::from_millis(100))
    ])
    .await;
    let client = fast_client(3);
    let (ctx, cancel) = Context::background().with_cancel();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = client
        .get(&ctx, &server.url(), &[])
        .await
        .expect_err("cancelled request must not succeed");

    assert!(matches!(err, ResilientError::Cancelled(CancelReason::Cancelled)));
    canceller.await.expect("canceller must finish");
}

#[tokio::test]
async fn cancel_during_retry_wait_returns_before_the_wait_elapses() {
    let server = spawn_server(Vec::new()).await;
    let client = ResilientClient::with_override(&OptionsOverride {
        max_retries: 3,
        initial_wait: Duration::from_secs(5),
        force_http2: true,
        ..OptionsOverride::default()
    })
    .expect("client must build");

    let ctx = Context::with_timeout(Duration::from_millis(200));
    let start = Instant::now();
    let err = client
        .get(&ctx, &server.url(), &[])
        .await
        .expect_err("deadline must cut the retry wait short");

    assert!(matches!(
        err,
        ResilientError::Cancelled(CancelReason::DeadlineExceeded)
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn cancelling_parent_context_stops_retry_wait() {
    let server = spawn_server(Vec::new()).await;
    let client = ResilientClient::with_override(&OptionsOverride {
        max_retries: 3,
        initial_wait: Duration::from_secs(5),
        force_http2: true,
        ..OptionsOverride::default()
    })
    .expect("client must build");

    let (parent, parent_cancel) = Context::background().with_cancel();
    let (child, _child_cancel) = parent.clone().with_cancel();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        parent_cancel.cancel();
    });

    let start = Instant::now();
    let err = client
        .get(&child, &server.url(), &[])
        .await
        .expect_err("parent cancel must reach the derived context");

    assert!(matches!(err, ResilientError::Cancelled(CancelReason::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(server.hits(), 1);
    canceller.await.expect("canceller must finish");
}

#[tokio::test]
async fn already_cancelled_context_makes_no_attempt() {
    let server = spawn_server(vec![MockResponse::status(StatusCode::OK)]).await;
    let client = fast_client(1);
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();

    let err = client
        .get(&ctx, &server.url(), &[])
        .await
        .expect_err("cancelled context must fail");

    assert!(err.is_cancelled());
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn retried_attempts_resend_identical_body_and_headers() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::BAD_GATEWAY),
        MockResponse::status(StatusCode::SERVICE_UNAVAILABLE),
        MockResponse::status(StatusCode::CREATED),
    ])
    .await;
    let client = fast_client(2);
    let payload = r#"{"name":"widget","qty":3}"#;

    let response = client
        .post(
            &Context::background(),
            &server.url(),
            payload,
            &[("content-type", "application/json"), ("x-trace", "t-1")],
        )
        .await
        .expect("post must succeed after retries");

    assert_eq!(response.status(), StatusCode::CREATED);
    let observed = server.observed();
    assert_eq!(observed.len(), 3);
    for request in observed {
        assert_eq!(request.method, Method::POST);
        assert_eq!(&request.body[..], payload.as_bytes());
        assert_eq!(
            request.headers.get("x-trace").map(|v| v.as_bytes()),
            Some(&b"t-1"[..])
        );
    }
}

#[tokio::test]
async fn method_shortcuts_send_their_method() {
    let server = spawn_server_with_fallback(Vec::new(), MockResponse::status(StatusCode::OK)).await;
    let client = fast_client(1);
    let ctx = Context::background();

    client.get(&ctx, &server.url(), &[]).await.expect("get");
    client.post(&ctx, &server.url(), "a", &[]).await.expect("post");
    client.put(&ctx, &server.url(), "b", &[]).await.expect("put");
    client.patch(&ctx, &server.url(), "c", &[]).await.expect("patch");
    client.delete(&ctx, &server.url(), &[]).await.expect("delete");

    let methods: Vec<Method> = server.observed().into_iter().map(|o| o.method).collect();
    assert_eq!(
        methods,
        vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE
        ]
    );
}

#[tokio::test]
async fn transport_errors_exhaust_with_zero_status() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("must bind");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);

    let client = fast_client(1);
    let retries = Arc::new(Mutex::new(Vec::new()));
    let seen = retries.clone();
    client.set_retry_hook(move |attempt, response, error| {
        seen.lock()
            .expect("retry log mutex must not be poisoned")
            .push((attempt, response.is_some(), error.is_some()));
    });

    let err = client
        .get(&Context::background(), &format!("http://{address}/"), &[])
        .await
        .expect_err("closed port must fail");

    assert_eq!(
        *retries.lock().expect("retry log mutex must not be poisoned"),
        vec![(0, false, true)]
    );

    match err {
        ResilientError::RetryExhausted(exhausted) => {
            assert_eq!(exhausted.attempts, 2);
            assert_eq!(exhausted.last_status, 0);
            assert!(matches!(exhausted.last_error, LastError::Transport(_)));
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn request_timeout_is_a_transport_failure() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::OK).with_delay(Duration::from_millis(150))
    ])
    .await;
    let client = ResilientClient::with_options(ClientOptions {
        timeout: Duration::from_millis(20),
        max_retries: 0,
        ..ClientOptions::default()
    })
    .expect("client must build");

    let err = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect_err("request must time out");

    match err {
        ResilientError::RetryExhausted(exhausted) => match exhausted.last_error {
            LastError::Transport(inner) => assert!(inner.is_timeout()),
            other => panic!("expected transport timeout, got {other:?}"),
        },
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u64,
    name: String,
}

#[tokio::test]
async fn decode_json_reads_structured_body() {
    let server = spawn_server(vec![
        MockResponse::status(StatusCode::OK).body(r#"{"id":7,"name":"widget"}"#),
        MockResponse::status(StatusCode::OK).body(r#"{"id": oops}"#),
    ])
    .await;
    let client = fast_client(1);
    let ctx = Context::background();

    let response = client.get(&ctx, &server.url(), &[]).await.expect("get");
    let item: Item = client.decode_json(response).await.expect("valid JSON");
    assert_eq!(
        item,
        Item {
            id: 7,
            name: "widget".to_owned()
        }
    );

    let response = client.get(&ctx, &server.url(), &[]).await.expect("get");
    let err = client
        .decode_json::<Item>(response)
        .await
        .expect_err("invalid JSON must fail");
    assert!(matches!(err, ResilientError::Decode(_)));
}

#[tokio::test]
#[traced_test]
async fn exhaustion_is_logged() {
    let server = spawn_server(Vec::new()).await;
    let client = fast_client(1);

    let _ = client
        .get(&Context::background(), &server.url(), &[])
        .await
        .expect_err("always-500 must exhaust retries");

    assert!(logs_contain("request failed, retrying"));
    assert!(logs_contain("request failed after all retries"));
}
