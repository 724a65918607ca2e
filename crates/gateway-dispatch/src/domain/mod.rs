//! Domain types for the dispatch engine.
//!
//! Subscription model, execution context, failures, error taxonomy and
//! configuration. Async machinery lives in `subscription` and `proxy`.

pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod failure;
pub mod subscription;

// Re-exports for convenience
pub use config::{
    BackoffStrategy, ConfigError, DispatcherConfig, ProxyConfig, RetryConfig, ServiceConfig,
    TracingConfig,
};
pub use context::{attributes, ChunkStream, ExecutionContext, ExecutionPhase, Metrics};
pub use correlation::ExecutionId;
pub use error::{DispatchError, DispatchResult, InvokerError, ProxyError};
pub use failure::ExecutionFailure;
pub use subscription::{
    ConsumerStatus, Subscription, SubscriptionConfiguration, SubscriptionId, SubscriptionStatus,
};
