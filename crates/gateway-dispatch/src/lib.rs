//! Gateway Dispatch - subscription dispatch engine and reactive proxy bridge.
//!
//! Drives long-lived subscriptions (webhooks and other push entrypoints)
//! through the API reactor they belong to.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     SUBSCRIPTION DISPATCH SERVICE                    │
//! │        (mpsc<Subscription> from the sync process, watch shutdown)     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────────────┐    │
//! │  │                 SubscriptionDispatcher                        │    │
//! │  │  eligibility → registry → acceptor → context → spawn          │    │
//! │  └──────┬─────────────────────────┬──────────────────────────────┘    │
//! │         │                         │                                   │
//! │  ┌──────┴─────────────┐   ┌───────┴───────────────────────────┐       │
//! │  │ ActiveDispatch     │   │ attempt: pre chain → reactor →    │       │
//! │  │ Registry (DashMap) │   │ post chain, retry with backoff,   │       │
//! │  │ + DispatchHandle   │   │ startingAt delay, endingAt cutoff │       │
//! │  └────────────────────┘   └───────┬───────────────────────────┘       │
//! └───────────────────────────────────┼──────────────────────────────────┘
//!                                     │ Invoker
//!                     ┌───────────────┴────────────────┐
//!                     │ Proxy bridge: InvokerAdapter,  │
//!                     │ ConnectionHandlerAdapter,      │
//!                     │ FlowableProxyResponse (pause / │
//!                     │ resume backpressure)           │
//!                     └────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gateway_dispatch::{
//!     DispatcherConfig, InMemoryAcceptorRegistry, SubscriptionDispatchService,
//!     SubscriptionDispatcher,
//! };
//!
//! let config = DispatcherConfig::from_env()?;
//! let dispatcher = SubscriptionDispatcher::builder(Arc::new(acceptors))
//!     .config(config.clone())
//!     .build()?;
//! let service = SubscriptionDispatchService::new(dispatcher, config.service);
//! let (events, rx) = service.event_channel();
//! service.start(rx).await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod proxy;
pub mod service;
pub mod subscription;
pub mod telemetry;

// Re-exports for public API
pub use adapters::{
    DefaultSubscriptionAcceptor, InMemoryAcceptorRegistry, SequentialProcessorChain, TracingTracer,
};
pub use domain::config::{DispatcherConfig, RetryConfig};
pub use domain::context::{ExecutionContext, ExecutionPhase};
pub use domain::error::{DispatchError, DispatchResult, InvokerError, ProxyError};
pub use domain::failure::ExecutionFailure;
pub use domain::subscription::{ConsumerStatus, Subscription, SubscriptionStatus};
pub use proxy::{ConnectionHandlerAdapter, FlowableProxyResponse, InvokerAdapter};
pub use service::SubscriptionDispatchService;
pub use subscription::{DispatchCompletion, SubscriptionDispatcher};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
