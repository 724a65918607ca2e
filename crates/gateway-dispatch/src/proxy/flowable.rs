//! Pull-based view over a pausable, push-based upstream body.
//!
//! Flow control is credit based: the subscriber grants demand with
//! [`ProxyBody::request`], every forwarded chunk consumes one credit. When
//! credits reach zero the upstream is paused; new credits resume it.
//!
//! The upstream is paused at initialisation and stays paused until the
//! subscriber first grants demand, so no chunk can arrive before a
//! subscriber exists.

use crate::domain::error::ProxyError;
use crate::ports::proxy::{ChunkHandler, EndHandler, ProxyConnection, ProxyResponse};
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type CompleteCallback = Box<dyn FnOnce() + Send>;
type ChunkSender = mpsc::UnboundedSender<Result<Bytes, ProxyError>>;
type ChunkReceiver = mpsc::UnboundedReceiver<Result<Bytes, ProxyError>>;

/// Upstream response adapted to a single-subscriber chunk stream
#[derive(Clone, Default)]
pub struct FlowableProxyResponse {
    inner: Arc<FlowableInner>,
}

#[derive(Default)]
struct FlowableInner {
    flow: Mutex<Option<Arc<Flow>>>,
    subscribed: AtomicBool,
}

/// Shared state between the upstream handlers and the subscriber
struct Flow {
    connection: Arc<dyn ProxyConnection>,
    response: Arc<dyn ProxyResponse>,
    sender: Mutex<Option<ChunkSender>>,
    on_complete: Mutex<Option<CompleteCallback>>,
    requested: AtomicU64,
    paused: AtomicBool,
    cancelled: AtomicBool,
    completed: AtomicBool,
}

impl FlowableProxyResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the upstream. The upstream is paused until demand arrives.
    pub fn initialize(
        &self,
        connection: Arc<dyn ProxyConnection>,
        response: Arc<dyn ProxyResponse>,
    ) {
        let flow = Arc::new(Flow {
            connection,
            response,
            sender: Mutex::new(None),
            on_complete: Mutex::new(None),
            requested: AtomicU64::new(0),
            paused: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        });
        flow.response.pause();
        *self.inner.flow.lock() = Some(flow);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.flow.lock().is_some()
    }

    /// Run `callback` once the upstream body has ended, before the stream
    /// reports completion. Ignored when the response was never initialised.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        let Some(flow) = self.inner.flow.lock().clone() else {
            return false;
        };
        *flow.on_complete.lock() = Some(Box::new(callback));
        true
    }

    /// Cancel the upstream response and connection (no-op once completed)
    pub fn cancel(&self) {
        if let Some(flow) = self.inner.flow.lock().clone() {
            flow.cancel();
        }
    }

    /// Subscribe to the body.
    ///
    /// Only the first call gets the body; later calls get a stream that
    /// fails with [`ProxyError::AlreadySubscribed`]. A response that was
    /// never initialised yields an empty, completed stream.
    pub fn subscribe(&self) -> ProxyBody {
        if self.inner.subscribed.swap(true, Ordering::AcqRel) {
            debug!("Rejecting second subscription to proxy response");
            return ProxyBody::failed(ProxyError::AlreadySubscribed);
        }

        let Some(flow) = self.inner.flow.lock().clone() else {
            return ProxyBody::empty();
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        *flow.sender.lock() = Some(sender);

        let weak = Arc::downgrade(&flow);
        let on_chunk: ChunkHandler = Arc::new(move |chunk| {
            if let Some(flow) = Weak::upgrade(&weak) {
                flow.handle_chunk(chunk);
            }
        });
        let weak = Arc::downgrade(&flow);
        let on_end: EndHandler = Arc::new(move || {
            if let Some(flow) = Weak::upgrade(&weak) {
                flow.handle_end();
            }
        });
        flow.response.body_handler(Some(on_chunk));
        flow.response.end_handler(Some(on_end));

        ProxyBody {
            state: BodyState::Live { flow, receiver },
            prefetch: None,
        }
    }
}

impl fmt::Debug for FlowableProxyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowableProxyResponse")
            .field("initialized", &self.is_initialized())
            .field("subscribed", &self.inner.subscribed.load(Ordering::Acquire))
            .finish()
    }
}

impl Flow {
    fn handle_chunk(&self, chunk: Bytes) {
        if self.cancelled.load(Ordering::Acquire) || self.completed.load(Ordering::Acquire) {
            trace!("Dropping chunk received after termination");
            return;
        }

        if let Some(sender) = self.sender.lock().as_ref() {
            // Receiver gone means the subscriber was dropped; Drop cancels.
            let _ = sender.send(Ok(chunk));
        }

        let previous = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);

        if previous <= 1 {
            self.pause_upstream();
            // Demand may have been granted between the decrement and the pause.
            if self.requested.load(Ordering::Acquire) > 0 {
                self.resume_upstream();
            }
        }
    }

    fn handle_end(&self) {
        if self.cancelled.load(Ordering::Acquire) || self.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.response.body_handler(None);
        self.response.end_handler(None);

        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback();
        }

        // Closing the channel completes the subscriber after buffered chunks.
        self.sender.lock().take();
        debug!("Proxy response body completed");
    }

    fn request(&self, n: u64) {
        if n == 0 || self.cancelled.load(Ordering::Acquire) || self.completed.load(Ordering::Acquire)
        {
            return;
        }
        self.requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_add(n))
            })
            .ok();
        self.resume_upstream();
    }

    fn pause_upstream(&self) {
        if self
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.response.pause();
        }
    }

    fn resume_upstream(&self) {
        if self
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.response.resume();
        }
    }

    fn cancel(&self) {
        if self.completed.load(Ordering::Acquire) || self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender.lock().take();
        self.response.cancel();
        self.connection.cancel();
        debug!("Proxy response cancelled by subscriber");
    }
}

enum BodyState {
    Empty,
    Failed(Option<ProxyError>),
    Live {
        flow: Arc<Flow>,
        receiver: ChunkReceiver,
    },
    Done,
}

/// Chunk stream of a [`FlowableProxyResponse`].
///
/// Without [`ProxyBody::prefetch`] demand must be granted explicitly with
/// [`ProxyBody::request`]. Dropping the body before it completes cancels
/// the upstream response and connection.
pub struct ProxyBody {
    state: BodyState,
    prefetch: Option<u64>,
}

impl ProxyBody {
    fn empty() -> Self {
        Self {
            state: BodyState::Empty,
            prefetch: None,
        }
    }

    fn failed(error: ProxyError) -> Self {
        Self {
            state: BodyState::Failed(Some(error)),
            prefetch: None,
        }
    }

    /// Grant `batch` more chunks whenever the buffered ones are drained
    #[must_use]
    pub fn prefetch(mut self, batch: u64) -> Self {
        self.prefetch = (batch > 0).then_some(batch);
        self
    }

    /// Grant `n` more chunks of demand
    pub fn request(&self, n: u64) {
        if let BodyState::Live { flow, .. } = &self.state {
            flow.request(n);
        }
    }

    /// Stop the body; cancels the upstream when it has not completed
    pub fn cancel(&mut self) {
        if let BodyState::Live { flow, .. } = &self.state {
            flow.cancel();
        }
        self.state = BodyState::Done;
    }
}

impl Stream for ProxyBody {
    type Item = Result<Bytes, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let prefetch = this.prefetch;

        let poll = match &mut this.state {
            BodyState::Empty | BodyState::Done => return Poll::Ready(None),
            BodyState::Failed(error) => {
                let error = error.take();
                if error.is_none() {
                    this.state = BodyState::Done;
                }
                return Poll::Ready(error.map(Err));
            }
            BodyState::Live { flow, receiver } => match receiver.poll_recv(cx) {
                Poll::Pending => match prefetch {
                    Some(batch) if flow.requested.load(Ordering::Acquire) == 0 => {
                        flow.request(batch);
                        receiver.poll_recv(cx)
                    }
                    _ => Poll::Pending,
                },
                ready => ready,
            },
        };

        if let Poll::Ready(None) = poll {
            this.state = BodyState::Done;
        }
        poll
    }
}

impl Drop for ProxyBody {
    fn drop(&mut self) {
        if let BodyState::Live { flow, .. } = &self.state {
            flow.cancel();
        }
    }
}

impl fmt::Debug for ProxyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            BodyState::Empty => "empty",
            BodyState::Failed(_) => "failed",
            BodyState::Live { .. } => "live",
            BodyState::Done => "done",
        };
        f.debug_struct("ProxyBody")
            .field("state", &state)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}
