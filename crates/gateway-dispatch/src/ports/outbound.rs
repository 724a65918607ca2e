//! Outbound ports consumed by the dispatch engine.

use crate::domain::context::{ExecutionContext, ExecutionPhase};
use crate::domain::error::DispatchResult;
use crate::domain::subscription::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Handler executing one API's delivery pipeline
#[async_trait]
pub trait ApiReactor: Send + Sync {
    async fn handle(&self, context: Arc<ExecutionContext>) -> DispatchResult;
}

/// Routing rule binding an API id to its reactor
pub trait Acceptor: Send + Sync {
    fn api_id(&self) -> &str;

    fn accept(&self, subscription: &Subscription) -> bool {
        subscription.api == self.api_id()
    }

    /// `None` when the API is known but no reactor is deployed
    fn reactor(&self) -> Option<Arc<dyn ApiReactor>>;
}

/// Source of subscription acceptors
pub trait AcceptorRegistry: Send + Sync {
    fn subscription_acceptors(&self) -> Vec<Arc<dyn Acceptor>>;
}

/// Platform processors run around the reactor
#[async_trait]
pub trait ProcessorChain: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self, context: &ExecutionContext, phase: ExecutionPhase) -> DispatchResult;
}

/// One step of a [`ProcessorChain`]
#[async_trait]
pub trait Processor: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self, context: &ExecutionContext) -> DispatchResult;
}

/// Reactive invoker used by reactors to reach the upstream
#[async_trait]
pub trait Invoker: Send + Sync {
    fn id(&self) -> &str;

    async fn invoke(&self, context: Arc<ExecutionContext>) -> DispatchResult;
}

/// Span factory
pub trait Tracer: Send + Sync {
    fn span(&self, name: &str) -> Arc<dyn Span>;
}

/// Open span; nested components may enrich it while it is stored on the context
pub trait Span: Send + Sync {
    fn with_attribute(&self, key: &str, value: &str);

    fn end(&self);
}

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for tests and replays
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub DateTime<Utc>);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
