//! Request body (pull-based stream) → legacy body/end handlers.

use super::CompletionEmitter;
use crate::domain::context::ChunkStream;
use crate::domain::error::DispatchError;
use crate::ports::proxy::{ChunkHandler, EndHandler, RequestStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Forwards request chunks to the handlers a legacy invoker registers.
///
/// Nothing is read from the request body before `resume`; forwarding then
/// runs on its own task, in order, and stops at the first error.
pub struct ReadWriteStreamAdapter {
    shared: Arc<Shared>,
    chunks: Mutex<Option<ChunkStream>>,
    task: Mutex<Option<JoinHandle<()>>>,
    resumed: AtomicBool,
}

struct Shared {
    body: Mutex<Option<ChunkHandler>>,
    end: Mutex<Option<EndHandler>>,
    emitter: CompletionEmitter,
}

impl ReadWriteStreamAdapter {
    /// `chunks` is `None` for requests without a body
    pub fn new(chunks: Option<ChunkStream>, emitter: CompletionEmitter) -> Self {
        Self {
            shared: Arc::new(Shared {
                body: Mutex::new(None),
                end: Mutex::new(None),
                emitter,
            }),
            chunks: Mutex::new(chunks),
            task: Mutex::new(None),
            resumed: AtomicBool::new(false),
        }
    }

    /// Stop forwarding; handlers are not called afterwards
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.body.lock().take();
        self.shared.end.lock().take();
    }

    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::Acquire)
    }
}

impl Shared {
    fn on_chunk(&self, chunk: bytes::Bytes) {
        let handler = self.body.lock().clone();
        if let Some(handler) = handler {
            handler(chunk);
        }
    }

    fn on_end(&self) {
        let handler = self.end.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn on_error(&self, error: DispatchError) {
        self.body.lock().take();
        self.end.lock().take();
        self.emitter.try_error(error);
    }
}

impl RequestStream for ReadWriteStreamAdapter {
    fn body_handler(&self, handler: ChunkHandler) {
        *self.shared.body.lock() = Some(handler);
    }

    fn end_handler(&self, handler: EndHandler) {
        *self.shared.end.lock() = Some(handler);
    }

    fn resume(&self) {
        if self.resumed.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(mut chunks) = self.chunks.lock().take() else {
            self.shared.on_end();
            return;
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.shared
                    .on_error(DispatchError::Unexpected(format!("cannot forward request body: {e}")));
                return;
            }
        };

        let shared = Arc::clone(&self.shared);
        let task = runtime.spawn(async move {
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => shared.on_chunk(chunk),
                    Err(e) => {
                        debug!(error = %e, "Request body stream failed");
                        shared.on_error(e.into());
                        return;
                    }
                }
            }
            shared.on_end();
        });
        *self.task.lock() = Some(task);
    }
}

impl Drop for ReadWriteStreamAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ProxyError;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;

    fn recorder(adapter: &ReadWriteStreamAdapter) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let body_events = events.clone();
        adapter.body_handler(Arc::new(move |chunk: Bytes| {
            body_events
                .lock()
                .push(String::from_utf8_lossy(&chunk).into_owned());
        }));
        let end_events = events.clone();
        adapter.end_handler(Arc::new(move || end_events.lock().push("end".into())));
        events
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_nothing_flows_before_resume() {
        let (emitter, _signal) = CompletionEmitter::new();
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"a"))]).boxed();
        let adapter = ReadWriteStreamAdapter::new(Some(chunks), emitter);
        let events = recorder(&adapter);

        settle().await;
        assert!(events.lock().is_empty());
        assert!(!adapter.is_resumed());
    }

    #[tokio::test]
    async fn test_forwards_in_order_then_ends() {
        let (emitter, _signal) = CompletionEmitter::new();
        let chunks = stream::iter(
            ["a", "b", "c"]
                .into_iter()
                .map(|s| Ok(Bytes::from(s)))
                .collect::<Vec<_>>(),
        )
        .boxed();
        let adapter = ReadWriteStreamAdapter::new(Some(chunks), emitter);
        let events = recorder(&adapter);

        adapter.resume();
        adapter.resume();
        settle().await;

        assert_eq!(*events.lock(), vec!["a", "b", "c", "end"]);
    }

    #[tokio::test]
    async fn test_error_reaches_emitter_and_stops_handlers() {
        let (emitter, signal) = CompletionEmitter::new();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(ProxyError::Stream("reset".into())),
            Ok(Bytes::from_static(b"b")),
        ])
        .boxed();
        let adapter = ReadWriteStreamAdapter::new(Some(chunks), emitter);
        let events = recorder(&adapter);

        adapter.resume();

        assert!(signal.await.unwrap().is_err());
        settle().await;
        assert_eq!(*events.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_no_body_ends_immediately() {
        let (emitter, _signal) = CompletionEmitter::new();
        let adapter = ReadWriteStreamAdapter::new(None, emitter);
        let events = recorder(&adapter);

        adapter.resume();

        assert_eq!(*events.lock(), vec!["end"]);
    }
}
