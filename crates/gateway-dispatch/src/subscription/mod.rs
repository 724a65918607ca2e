//! Subscription dispatch: routing, context creation, active executions,
//! scheduling and the dispatcher itself.

pub mod acceptor;
pub mod context_factory;
pub mod dispatcher;
pub mod registry;
pub mod scheduling;

pub use acceptor::SubscriptionAcceptorResolver;
pub use context_factory::SubscriptionExecutionContextFactory;
pub use dispatcher::{
    DispatchCompletion, SubscriptionDispatcher, SubscriptionDispatcherBuilder, DISPATCH_SPAN_NAME,
};
pub use registry::{ActiveDispatchRegistry, DispatchHandle, Preparation};
