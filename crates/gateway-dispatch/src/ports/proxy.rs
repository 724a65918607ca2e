//! Legacy callback-style proxy ports.
//!
//! These mirror the push model of the HTTP client layer: handlers are
//! registered on a response and invoked for each body chunk, the upstream
//! is throttled with `pause`/`resume`. The bridge in [`crate::proxy`]
//! adapts them to pull-based streams.

use crate::domain::context::ExecutionContext;
use crate::domain::error::InvokerError;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Callback receiving one body chunk
pub type ChunkHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Callback receiving end-of-body
pub type EndHandler = Arc<dyn Fn() + Send + Sync>;

/// Callback receiving the upstream response once the connection answers
pub type ResponseHandler = Box<dyn FnOnce(Arc<dyn ProxyResponse>) + Send>;

/// Raw header pairs as exposed by the legacy client
pub type RawHeaders = Vec<(String, String)>;

/// Failure details a response may carry when a processor aborted it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessorFailure {
    pub key: Option<String>,
    pub message: Option<String>,
    pub content_type: Option<String>,
    pub parameters: Map<String, Value>,
}

/// Upstream response (one per connection)
pub trait ProxyResponse: Send + Sync {
    /// `None` when the upstream never produced a status
    fn status(&self) -> Option<u16>;

    fn reason(&self) -> Option<String> {
        None
    }

    fn headers(&self) -> RawHeaders;

    /// Available once the body has ended
    fn trailers(&self) -> RawHeaders {
        Vec::new()
    }

    fn connected(&self) -> bool {
        true
    }

    /// `None` unregisters the current handler
    fn body_handler(&self, handler: Option<ChunkHandler>);

    fn end_handler(&self, handler: Option<EndHandler>);

    fn pause(&self);

    fn resume(&self);

    fn cancel(&self);

    /// Processor-failure capability
    fn processor_failure(&self) -> Option<ProcessorFailure> {
        None
    }
}

/// Upstream connection
pub trait ProxyConnection: Send + Sync {
    fn write(&self, chunk: Bytes);

    fn end(&self);

    fn cancel(&self);

    fn response_handler(&self, handler: ResponseHandler);
}

/// Receives the connection opened by a legacy invoker
pub trait ConnectionHandler: Send + Sync {
    fn handle(&self, connection: Arc<dyn ProxyConnection>);
}

/// Request body as seen by a legacy invoker; nothing flows before `resume`
pub trait RequestStream: Send + Sync {
    fn body_handler(&self, handler: ChunkHandler);

    fn end_handler(&self, handler: EndHandler);

    fn resume(&self);
}

/// Callback-based invoker wrapped by [`crate::proxy::InvokerAdapter`]
pub trait LegacyInvoker: Send + Sync {
    fn id(&self) -> &str;

    /// Must not block; the connection is reported through `connection_handler`
    fn invoke(
        &self,
        context: &ExecutionContext,
        request: Arc<dyn RequestStream>,
        connection_handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), InvokerError>;
}
