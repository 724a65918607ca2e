//! Adapters for the dispatch engine.
//!
//! Default implementations of the outbound ports.

pub mod memory_registry;
pub mod processor_chain;
pub mod tracing_tracer;

pub use memory_registry::{DefaultSubscriptionAcceptor, InMemoryAcceptorRegistry};
pub use processor_chain::SequentialProcessorChain;
pub use tracing_tracer::{TracingSpan, TracingTracer};
