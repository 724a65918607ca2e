//! Ports (hexagonal boundaries) of the dispatch engine.

pub mod outbound;
pub mod proxy;

pub use outbound::{
    Acceptor, AcceptorRegistry, ApiReactor, FixedTimeSource, Invoker, Processor, ProcessorChain,
    Span, SystemTimeSource, TimeSource, Tracer,
};
pub use proxy::{
    ChunkHandler, ConnectionHandler, EndHandler, LegacyInvoker, ProcessorFailure, ProxyConnection,
    ProxyResponse, RawHeaders, RequestStream, ResponseHandler,
};
