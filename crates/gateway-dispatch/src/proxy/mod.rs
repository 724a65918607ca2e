//! Proxy response bridge.
//!
//! Bridges the callback-driven proxy ports ([`crate::ports::proxy`]) and
//! the pull-based chunk streams carried by an [`crate::ExecutionContext`]:
//!
//! ```text
//!  request chunks ──► ReadWriteStreamAdapter ──body/end handlers──► legacy invoker
//!                                                                     │
//!  legacy connection ──response──► ConnectionHandlerAdapter ──► FlowableProxyResponse
//!                                       │ completion                 │ ProxyBody (Stream)
//!                                       ▼                            ▼
//!                                 InvokerAdapter ─────────► response chunks
//! ```

pub mod connection;
pub mod flowable;
pub mod invoker;
pub mod stream_adapter;

pub use connection::ConnectionHandlerAdapter;
pub use flowable::{FlowableProxyResponse, ProxyBody};
pub use invoker::InvokerAdapter;
pub use stream_adapter::ReadWriteStreamAdapter;

use crate::domain::error::{DispatchError, DispatchResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Receiving side of a [`CompletionEmitter`]
pub type CompletionSignal = oneshot::Receiver<DispatchResult>;

/// Single-shot completion shared by the adapters of one invocation.
///
/// The first `try_success`/`try_error` wins; later calls are ignored.
#[derive(Clone)]
pub struct CompletionEmitter {
    sender: Arc<Mutex<Option<oneshot::Sender<DispatchResult>>>>,
}

impl CompletionEmitter {
    pub fn new() -> (Self, CompletionSignal) {
        let (sender, receiver) = oneshot::channel();
        let emitter = Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        };
        (emitter, receiver)
    }

    pub fn try_success(&self) -> bool {
        self.emit(Ok(()))
    }

    pub fn try_error(&self, error: DispatchError) -> bool {
        self.emit(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn emit(&self, result: DispatchResult) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            return false;
        };
        // A dropped receiver still counts as completed.
        let _ = sender.send(result);
        true
    }
}
