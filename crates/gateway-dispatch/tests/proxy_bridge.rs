//! # Proxy Bridge Tests
//!
//! Exercises the bridge between callback-style legacy invokers and the
//! pull-based chunk streams of an execution context:
//!
//! - Backpressure accounting of `FlowableProxyResponse` (pause/resume)
//! - `InvokerAdapter` completion, failure and cancellation paths
//! - Request body forwarding through `ReadWriteStreamAdapter`

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use gateway_dispatch::domain::failure::keys;
use gateway_dispatch::ports::proxy::{
    ChunkHandler, ConnectionHandler, EndHandler, LegacyInvoker, ProcessorFailure,
    ProxyConnection, ProxyResponse, RawHeaders, RequestStream, ResponseHandler,
};
use gateway_dispatch::ports::Invoker;
use gateway_dispatch::proxy::invoker::CLIENT_ABORTED_MESSAGE;
use gateway_dispatch::proxy::{CompletionEmitter, ReadWriteStreamAdapter};
use gateway_dispatch::{
    DispatchError, DispatcherConfig, ExecutionContext, ExecutionFailure, FlowableProxyResponse,
    InvokerAdapter, InvokerError, ProxyError,
};
use parking_lot::Mutex;
use proptest::prelude::*;

// =============================================================================
// Fakes
// =============================================================================

/// Upstream response emitting its queued chunks synchronously while resumed
#[derive(Default)]
struct FakeResponse {
    status: Option<u16>,
    headers: RawHeaders,
    trailers: RawHeaders,
    disconnected: bool,
    failure: Option<ProcessorFailure>,
    queue: Mutex<VecDeque<Bytes>>,
    finished: AtomicBool,
    paused: AtomicBool,
    emitting: AtomicBool,
    events: Mutex<Vec<&'static str>>,
    body: Mutex<Option<ChunkHandler>>,
    end: Mutex<Option<EndHandler>>,
}

impl FakeResponse {
    fn with_chunks(count: usize) -> Arc<Self> {
        let response = Self {
            status: Some(200),
            ..Default::default()
        };
        for index in 0..count {
            response.queue.lock().push_back(Bytes::from(format!("{index},")));
        }
        response.finished.store(true, Ordering::Release);
        Arc::new(response)
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    fn pump(&self) {
        if self.emitting.swap(true, Ordering::AcqRel) {
            return;
        }
        while !self.paused.load(Ordering::Acquire) && self.count("cancel") == 0 {
            let next = self.queue.lock().pop_front();
            match next {
                Some(chunk) => {
                    let body = self.body.lock().clone();
                    if let Some(body) = body {
                        body(chunk);
                    }
                }
                None => {
                    if self.finished.load(Ordering::Acquire) {
                        let end = self.end.lock().clone();
                        if let Some(end) = end {
                            end();
                        }
                    }
                    break;
                }
            }
        }
        self.emitting.store(false, Ordering::Release);
    }
}

impl ProxyResponse for FakeResponse {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn headers(&self) -> RawHeaders {
        self.headers.clone()
    }

    fn trailers(&self) -> RawHeaders {
        self.trailers.clone()
    }

    fn connected(&self) -> bool {
        !self.disconnected
    }

    fn body_handler(&self, handler: Option<ChunkHandler>) {
        *self.body.lock() = handler;
    }

    fn end_handler(&self, handler: Option<EndHandler>) {
        *self.end.lock() = handler;
    }

    fn pause(&self) {
        self.events.lock().push("pause");
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.events.lock().push("resume");
        self.paused.store(false, Ordering::Release);
        self.pump();
    }

    fn cancel(&self) {
        self.events.lock().push("cancel");
    }

    fn processor_failure(&self) -> Option<ProcessorFailure> {
        self.failure.clone()
    }
}

#[derive(Default)]
struct FakeConnection {
    handler: Mutex<Option<ResponseHandler>>,
    cancels: AtomicUsize,
}

impl FakeConnection {
    fn respond(&self, response: Arc<FakeResponse>) {
        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            handler(response);
        }
    }
}

impl ProxyConnection for FakeConnection {
    fn write(&self, _chunk: Bytes) {}

    fn end(&self) {}

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::AcqRel);
    }

    fn response_handler(&self, handler: ResponseHandler) {
        *self.handler.lock() = Some(handler);
    }
}

#[derive(Clone)]
enum Mode {
    FailSync,
    Hang,
    Respond(Arc<FakeResponse>),
    /// Forward the request body into the response queue, answer on request end
    Echo(Arc<FakeResponse>),
}

struct ScriptedInvoker {
    mode: Mode,
    connection: Arc<FakeConnection>,
    adapted_during_invoke: AtomicBool,
}

impl ScriptedInvoker {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            connection: Arc::new(FakeConnection::default()),
            adapted_during_invoke: AtomicBool::new(false),
        })
    }
}

impl LegacyInvoker for ScriptedInvoker {
    fn id(&self) -> &str {
        "scripted"
    }

    fn invoke(
        &self,
        context: &ExecutionContext,
        request: Arc<dyn RequestStream>,
        connection_handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), InvokerError> {
        self.adapted_during_invoke
            .store(context.is_invoker_adapted(), Ordering::Release);

        match &self.mode {
            Mode::FailSync => return Err(InvokerError::Connection("connection refused".into())),
            Mode::Hang => connection_handler.handle(self.connection.clone()),
            Mode::Respond(response) => {
                connection_handler.handle(self.connection.clone());
                self.connection.respond(Arc::clone(response));
            }
            Mode::Echo(response) => {
                connection_handler.handle(self.connection.clone());
                let sink = Arc::clone(response);
                request.body_handler(Arc::new(move |chunk: Bytes| {
                    sink.queue.lock().push_back(chunk)
                }));
                let connection = Arc::clone(&self.connection);
                let response = Arc::clone(response);
                request.end_handler(Arc::new(move || {
                    response.finished.store(true, Ordering::Release);
                    connection.respond(Arc::clone(&response));
                }));
                request.resume();
            }
        }
        Ok(())
    }
}

fn request_body(chunks: &[&'static str]) -> gateway_dispatch::domain::ChunkStream {
    futures::stream::iter(
        chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect::<Vec<_>>(),
    )
    .boxed()
}

// =============================================================================
// Backpressure accounting
// =============================================================================

#[tokio::test]
async fn test_hundred_chunks_in_batches_of_sixteen() {
    // Arrange
    let response = FakeResponse::with_chunks(100);
    let connection = Arc::new(FakeConnection::default());
    let flowable = FlowableProxyResponse::new();
    flowable.initialize(connection.clone(), response.clone());

    // Act
    let chunks: Vec<_> = flowable.subscribe().prefetch(16).collect().await;

    // Assert
    assert_eq!(chunks.len(), 100);
    assert_eq!(response.count("pause"), 7);
    assert_eq!(response.count("resume"), 7);
    let expected: Vec<&str> = ["pause", "resume"].iter().copied().cycle().take(14).collect();
    assert_eq!(*response.events.lock(), expected);
    assert_eq!(connection.cancels.load(Ordering::Acquire), 0);
}

#[tokio::test]
async fn test_explicit_demand_drives_upstream() {
    let response = FakeResponse::with_chunks(10);
    let flowable = FlowableProxyResponse::new();
    flowable.initialize(Arc::new(FakeConnection::default()), response.clone());

    let mut body = flowable.subscribe();
    assert_eq!(response.count("resume"), 0);

    body.request(3);
    for expected in ["0,", "1,", "2,"] {
        let chunk = body.next().await.expect("chunk").expect("no error");
        assert_eq!(chunk, Bytes::from(expected));
    }
    assert_eq!(response.count("pause"), 2);
    assert_eq!(response.queue.lock().len(), 7);

    body.request(100);
    let rest: Vec<_> = body.collect().await;
    assert_eq!(rest.len(), 7);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_pause_resume_accounting(total in 0usize..300, batch in 1u64..40) {
        let response = FakeResponse::with_chunks(total);
        let flowable = FlowableProxyResponse::new();
        flowable.initialize(Arc::new(FakeConnection::default()), response.clone());

        let chunks: Vec<Bytes> = futures::executor::block_on(
            flowable.subscribe().prefetch(batch).map(|c| c.unwrap()).collect(),
        );

        let expected_cycles = 1 + total / batch as usize;
        prop_assert_eq!(chunks.len(), total);
        prop_assert_eq!(response.count("pause"), expected_cycles);
        prop_assert_eq!(response.count("resume"), expected_cycles);
        let ordered = chunks
            .iter()
            .enumerate()
            .all(|(i, c)| c == &Bytes::from(format!("{i},")));
        prop_assert!(ordered);
    }
}

#[tokio::test]
async fn test_second_subscriber_is_rejected() {
    let response = FakeResponse::with_chunks(2);
    let flowable = FlowableProxyResponse::new();
    flowable.initialize(Arc::new(FakeConnection::default()), response);

    let first = flowable.subscribe().prefetch(4);
    let second: Vec<_> = flowable.subscribe().collect().await;

    assert_eq!(second, vec![Err(ProxyError::AlreadySubscribed)]);
    assert_eq!(first.collect::<Vec<_>>().await.len(), 2);
}

// =============================================================================
// InvokerAdapter
// =============================================================================

#[tokio::test]
async fn test_invoke_streams_upstream_response() {
    // Arrange
    let mut upstream = FakeResponse {
        status: Some(201),
        headers: vec![("content-type".into(), "text/csv".into())],
        trailers: vec![("x-checksum".into(), "abc".into())],
        ..Default::default()
    };
    upstream.finished = AtomicBool::new(true);
    for index in 0..40 {
        upstream.queue.get_mut().push_back(Bytes::from(format!("{index},")));
    }
    let upstream = Arc::new(upstream);
    let legacy = ScriptedInvoker::new(Mode::Respond(upstream.clone()));
    let adapter = InvokerAdapter::new(legacy.clone(), 16);
    let context = Arc::new(ExecutionContext::new());

    // Act
    let result = adapter.invoke(Arc::clone(&context)).await;
    let body = context.response().body().await.expect("body");

    // Assert
    assert_eq!(result, Ok(()));
    assert!(legacy.adapted_during_invoke.load(Ordering::Acquire));
    assert!(!context.is_invoker_adapted());

    let response = context.response();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/csv");
    assert_eq!(response.trailers().get("x-checksum").unwrap(), "abc");

    let expected: String = (0..40).map(|i| format!("{i},")).collect();
    assert_eq!(body, Bytes::from(expected));
    assert_eq!(upstream.count("pause"), 3);
    assert_eq!(upstream.count("resume"), 3);
}

#[tokio::test]
async fn test_invoker_batches_follow_configured_prefetch() {
    // Arrange
    let mut upstream = FakeResponse {
        status: Some(200),
        ..Default::default()
    };
    upstream.finished = AtomicBool::new(true);
    for index in 0..40 {
        upstream.queue.get_mut().push_back(Bytes::from(format!("{index},")));
    }
    let upstream = Arc::new(upstream);
    let mut config = DispatcherConfig::default();
    config.proxy.prefetch = 8;
    let adapter =
        InvokerAdapter::from_config(ScriptedInvoker::new(Mode::Respond(upstream.clone())), &config);
    let context = Arc::new(ExecutionContext::new());

    // Act
    let result = adapter.invoke(Arc::clone(&context)).await;
    let body = context.response().body().await.expect("body");

    // Assert
    assert_eq!(result, Ok(()));
    let expected: String = (0..40).map(|i| format!("{i},")).collect();
    assert_eq!(body, Bytes::from(expected));
    assert_eq!(upstream.count("pause"), 6);
    assert_eq!(upstream.count("resume"), 6);
}

#[tokio::test]
async fn test_invoke_forwards_request_body() {
    // Arrange
    let upstream = Arc::new(FakeResponse {
        status: Some(200),
        ..Default::default()
    });
    let legacy = ScriptedInvoker::new(Mode::Echo(upstream));
    let adapter = InvokerAdapter::new(legacy, 2);
    let context = Arc::new(ExecutionContext::new());
    context.request().set_chunks(request_body(&["a", "b", "c", "d", "e"]));

    // Act
    let result = adapter.invoke(Arc::clone(&context)).await;

    // Assert
    assert_eq!(result, Ok(()));
    assert_eq!(
        context.response().body().await.unwrap(),
        Bytes::from_static(b"abcde")
    );
}

#[tokio::test]
async fn test_synchronous_invoker_failure_is_bad_gateway() {
    // Arrange
    let adapter = InvokerAdapter::new(ScriptedInvoker::new(Mode::FailSync), 16);
    let context = Arc::new(ExecutionContext::new());

    // Act
    let result = adapter.invoke(Arc::clone(&context)).await;

    // Assert
    let error = result.unwrap_err();
    let failure = error.execution_failure().expect("interruption failure");
    assert_eq!(failure.status_code, 502);
    assert_eq!(failure.key.as_deref(), Some(keys::GATEWAY_CLIENT_CONNECTION_ERROR));
    assert_eq!(
        context.request().metrics().error_key.as_deref(),
        Some(keys::GATEWAY_CLIENT_CONNECTION_ERROR)
    );
    assert!(context.response().body().await.unwrap().is_empty());
    assert!(!context.is_invoker_adapted());
}

#[tokio::test]
async fn test_unconnected_upstream_failure_is_propagated_verbatim() {
    // Arrange
    let mut parameters = serde_json::Map::new();
    parameters.insert("timeout".into(), serde_json::json!(5000));
    let upstream = Arc::new(FakeResponse {
        status: Some(504),
        disconnected: true,
        failure: Some(ProcessorFailure {
            key: Some("GATEWAY_TIMEOUT".into()),
            message: Some("Request timeout".into()),
            content_type: Some("application/json".into()),
            parameters: parameters.clone(),
        }),
        ..Default::default()
    });
    let adapter = InvokerAdapter::new(ScriptedInvoker::new(Mode::Respond(upstream.clone())), 16);
    let context = Arc::new(ExecutionContext::new());

    // Act
    let result = adapter.invoke(Arc::clone(&context)).await;

    // Assert
    let expected = ExecutionFailure::new(504)
        .key("GATEWAY_TIMEOUT")
        .message("Request timeout")
        .content_type("application/json")
        .parameters(parameters);
    assert_eq!(result, Err(DispatchError::InterruptionFailure(expected)));
    assert!(context.response().body().await.unwrap().is_empty());
    assert!(upstream.events.lock().is_empty());
}

#[tokio::test]
async fn test_unconnected_upstream_without_status_is_unavailable() {
    let upstream = Arc::new(FakeResponse {
        disconnected: true,
        ..Default::default()
    });
    let adapter = InvokerAdapter::new(ScriptedInvoker::new(Mode::Respond(upstream)), 16);
    let context = Arc::new(ExecutionContext::new());

    let result = adapter.invoke(Arc::clone(&context)).await;

    assert_eq!(
        result.unwrap_err().execution_failure().map(|f| f.status_code),
        Some(503)
    );
}

#[test]
fn test_cancelled_invocation_records_client_abort() {
    // Arrange
    let legacy = ScriptedInvoker::new(Mode::Hang);
    let adapter = InvokerAdapter::new(legacy.clone(), 16);
    let context = Arc::new(ExecutionContext::new());
    let mut invocation = tokio_test::task::spawn(adapter.invoke(Arc::clone(&context)));

    // Act
    tokio_test::assert_pending!(invocation.poll());
    assert!(context.is_invoker_adapted());
    drop(invocation);

    // Assert
    assert!(!context.is_invoker_adapted());
    let metrics = context.request().metrics();
    assert_eq!(
        metrics.error_key.as_deref(),
        Some(keys::CLIENT_ABORTED_DURING_RESPONSE_ERROR)
    );
    assert_eq!(metrics.error_message.as_deref(), Some(CLIENT_ABORTED_MESSAGE));
}

#[test]
fn test_completed_invocation_records_no_abort() {
    let upstream = FakeResponse::with_chunks(1);
    let adapter = InvokerAdapter::new(ScriptedInvoker::new(Mode::Respond(upstream)), 16);
    let context = Arc::new(ExecutionContext::new());

    let mut invocation = tokio_test::task::spawn(adapter.invoke(Arc::clone(&context)));
    tokio_test::assert_ready_ok!(invocation.poll());
    drop(invocation);

    assert!(context.request().metrics().error_key.is_none());
}

// =============================================================================
// ReadWriteStreamAdapter
// =============================================================================

#[tokio::test]
async fn test_request_stream_forwards_in_order_after_resume() {
    // Arrange
    let (emitter, _signal) = CompletionEmitter::new();
    let adapter = ReadWriteStreamAdapter::new(Some(request_body(&["x", "y", "z"])), emitter);
    let received = Arc::new(Mutex::new(Vec::<Bytes>::new()));
    let (ended_tx, ended_rx) = tokio::sync::oneshot::channel();
    let ended_tx = Mutex::new(Some(ended_tx));

    let sink = Arc::clone(&received);
    adapter.body_handler(Arc::new(move |chunk: Bytes| sink.lock().push(chunk)));
    adapter.end_handler(Arc::new(move || {
        if let Some(tx) = ended_tx.lock().take() {
            let _ = tx.send(());
        }
    }));
    tokio::task::yield_now().await;
    assert!(received.lock().is_empty());

    // Act
    adapter.resume();
    ended_rx.await.expect("end signalled");

    // Assert
    assert!(adapter.is_resumed());
    assert_eq!(
        *received.lock(),
        vec![
            Bytes::from_static(b"x"),
            Bytes::from_static(b"y"),
            Bytes::from_static(b"z")
        ]
    );
}

#[tokio::test]
async fn test_request_stream_error_fails_completion() {
    let (emitter, signal) = CompletionEmitter::new();
    let body = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"ok")),
        Err(ProxyError::Stream("client reset".into())),
        Ok(Bytes::from_static(b"never")),
    ])
    .boxed();
    let adapter = ReadWriteStreamAdapter::new(Some(body), emitter);
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    adapter.body_handler(Arc::new(move |_: Bytes| {
        counter.fetch_add(1, Ordering::AcqRel);
    }));

    adapter.resume();
    let outcome = signal.await.expect("emitter completed");

    assert!(matches!(outcome, Err(DispatchError::Unexpected(_))));
    assert_eq!(received.load(Ordering::Acquire), 1);
}
