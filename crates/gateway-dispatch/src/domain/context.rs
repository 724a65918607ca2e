//! Message-oriented execution context, one per dispatch attempt.
//!
//! The context is shared as `Arc<ExecutionContext>` between the dispatcher,
//! the reactor and the proxy bridge. Every field uses interior mutability
//! and no lock is ever held across an `.await`.

use super::correlation::ExecutionId;
use super::error::{DispatchError, ProxyError};
use super::failure::ExecutionFailure;
use super::subscription::Subscription;
use crate::ports::outbound::Span;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use http::HeaderMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Chunked body (request or response)
pub type ChunkStream = BoxStream<'static, Result<Bytes, ProxyError>>;

/// Public attribute names
pub mod attributes {
    pub const API: &str = "gateway.attribute.api";
    pub const PLAN: &str = "gateway.attribute.plan";
    pub const APPLICATION: &str = "gateway.attribute.application";
    pub const SUBSCRIPTION: &str = "gateway.attribute.subscription";
}

/// Processor chain phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    Request,
    Response,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("REQUEST"),
            Self::Response => f.write_str("RESPONSE"),
        }
    }
}

/// Per-request metrics reported by the analytics pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub api: Option<String>,
    pub plan: Option<String>,
    pub application: Option<String>,
    pub subscription: Option<String>,
    pub error_key: Option<String>,
    pub error_message: Option<String>,
    pub api_response_time_ms: Option<u64>,
}

/// Request side of a context
pub struct Request {
    id: ExecutionId,
    transaction_id: ExecutionId,
    timestamp: DateTime<Utc>,
    headers: Mutex<HeaderMap>,
    chunks: Mutex<Option<ChunkStream>>,
    metrics: Mutex<Metrics>,
}

impl Request {
    fn new() -> Self {
        Self {
            id: ExecutionId::new(),
            transaction_id: ExecutionId::new(),
            timestamp: Utc::now(),
            headers: Mutex::new(HeaderMap::new()),
            chunks: Mutex::new(None),
            metrics: Mutex::new(Metrics::default()),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn transaction_id(&self) -> ExecutionId {
        self.transaction_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn headers(&self) -> HeaderMap {
        self.headers.lock().clone()
    }

    pub fn with_headers<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
        f(&mut self.headers.lock())
    }

    pub fn set_chunks(&self, chunks: ChunkStream) {
        *self.chunks.lock() = Some(chunks);
    }

    /// Hand the body over to whoever forwards it (at most once)
    pub fn take_chunks(&self) -> Option<ChunkStream> {
        self.chunks.lock().take()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.lock().clone()
    }

    pub fn with_metrics<R>(&self, f: impl FnOnce(&mut Metrics) -> R) -> R {
        f(&mut self.metrics.lock())
    }
}

#[derive(Default)]
struct ResponseState {
    status: Option<u16>,
    reason: Option<String>,
    headers: HeaderMap,
    trailers: HeaderMap,
    body: Option<Bytes>,
    chunks: Option<ChunkStream>,
    ended: bool,
}

/// Response side of a context
#[derive(Default)]
pub struct Response {
    state: Mutex<ResponseState>,
}

impl Response {
    /// Defaults to 200 until something sets it
    pub fn status(&self) -> u16 {
        self.state.lock().status.unwrap_or(200)
    }

    pub fn set_status(&self, status: u16) {
        self.state.lock().status = Some(status);
    }

    pub fn reason(&self) -> Option<String> {
        self.state.lock().reason.clone()
    }

    pub fn set_reason(&self, reason: impl Into<String>) {
        self.state.lock().reason = Some(reason.into());
    }

    pub fn is_status_4xx(&self) -> bool {
        (400..500).contains(&self.status())
    }

    pub fn is_status_5xx(&self) -> bool {
        (500..600).contains(&self.status())
    }

    pub fn headers(&self) -> HeaderMap {
        self.state.lock().headers.clone()
    }

    pub fn with_headers<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
        f(&mut self.state.lock().headers)
    }

    pub fn trailers(&self) -> HeaderMap {
        self.state.lock().trailers.clone()
    }

    pub fn with_trailers<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
        f(&mut self.state.lock().trailers)
    }

    /// Replace the body with a buffered value
    pub fn set_body(&self, body: impl Into<Bytes>) {
        let mut state = self.state.lock();
        state.body = Some(body.into());
        state.chunks = None;
    }

    /// Replace the body with a chunk stream
    pub fn set_chunks(&self, chunks: ChunkStream) {
        let mut state = self.state.lock();
        state.chunks = Some(chunks);
        state.body = None;
    }

    pub fn take_chunks(&self) -> Option<ChunkStream> {
        self.state.lock().chunks.take()
    }

    pub fn has_chunks(&self) -> bool {
        self.state.lock().chunks.is_some()
    }

    /// Buffered body, collecting the chunk stream first if needed.
    ///
    /// A consumed stream is cached so later calls return the same bytes.
    pub async fn body(&self) -> Result<Bytes, ProxyError> {
        let chunks = {
            let mut state = self.state.lock();
            if let Some(body) = &state.body {
                return Ok(body.clone());
            }
            state.chunks.take()
        };

        let Some(mut chunks) = chunks else {
            return Ok(Bytes::new());
        };

        let mut buffer = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let body = buffer.freeze();
        self.state.lock().body = Some(body.clone());
        Ok(body)
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub fn end(&self) {
        self.state.lock().ended = true;
    }
}

/// Typed internal attributes, never exposed to user policies
#[derive(Default)]
struct InternalAttributes {
    subscription: Option<Arc<Subscription>>,
    subscription_type: Option<String>,
    span: Option<Arc<dyn Span>>,
    invoker_adapted: bool,
}

/// Execution context of one dispatch attempt
pub struct ExecutionContext {
    request: Request,
    response: Response,
    attributes: Mutex<HashMap<String, Value>>,
    internal: Mutex<InternalAttributes>,
}

impl ExecutionContext {
    /// Empty context with fresh request and transaction ids
    pub fn new() -> Self {
        Self {
            request: Request::new(),
            response: Response::default(),
            attributes: Mutex::new(HashMap::new()),
            internal: Mutex::new(InternalAttributes::default()),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.lock().get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.lock().insert(name.into(), value.into());
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.lock().remove(name)
    }

    pub fn subscription(&self) -> Option<Arc<Subscription>> {
        self.internal.lock().subscription.clone()
    }

    pub fn set_subscription(&self, subscription: Arc<Subscription>) {
        self.internal.lock().subscription = Some(subscription);
    }

    /// Entrypoint id of the subscription (`webhook`, ...)
    pub fn subscription_type(&self) -> Option<String> {
        self.internal.lock().subscription_type.clone()
    }

    pub fn set_subscription_type(&self, subscription_type: impl Into<String>) {
        self.internal.lock().subscription_type = Some(subscription_type.into());
    }

    pub fn span(&self) -> Option<Arc<dyn Span>> {
        self.internal.lock().span.clone()
    }

    pub fn set_span(&self, span: Arc<dyn Span>) {
        self.internal.lock().span = Some(span);
    }

    pub fn take_span(&self) -> Option<Arc<dyn Span>> {
        self.internal.lock().span.take()
    }

    /// True while a legacy invoker runs against this context
    pub fn is_invoker_adapted(&self) -> bool {
        self.internal.lock().invoker_adapted
    }

    pub(crate) fn set_invoker_adapted(&self, adapted: bool) {
        self.internal.lock().invoker_adapted = adapted;
    }

    /// Interrupt the execution with a structured failure.
    ///
    /// The failure is recorded on the metrics and returned as an error for
    /// the caller to propagate.
    pub fn interrupt_with(&self, failure: ExecutionFailure) -> DispatchError {
        self.request.with_metrics(|metrics| {
            if failure.key.is_some() {
                metrics.error_key = failure.key.clone();
            }
            if failure.message.is_some() {
                metrics.error_message = failure.message.clone();
            }
        });
        DispatchError::InterruptionFailure(failure)
    }

    /// Interrupt the execution without a failure payload
    pub fn interrupt(&self) -> DispatchError {
        DispatchError::Interrupted
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request.id)
            .field("transaction_id", &self.request.transaction_id)
            .field("status", &self.response.status())
            .field("subscription_type", &self.subscription_type())
            .finish()
    }
}
