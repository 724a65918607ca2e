//! Subscription dispatcher.
//!
//! # State machine (per subscription id)
//!
//! ```text
//!   Idle ──dispatch──► Scheduled ──startingAt──► Running ──ok──────────► Terminal
//!                         │                       │   ▲                   ▲
//!                         │                       │   └──── Retrying ◄──┐ │
//!                         │                       └── retryable error ───┘ │
//!                         └──── endingAt / dispose / replace ──────────────┘
//!   Terminal ──registry entry removed──► Idle
//! ```
//!
//! `dispatch` decides synchronously (eligibility, no-op detection,
//! replacement, routing, configuration) and updates the registry before
//! returning. The execution itself runs on a spawned tokio task that owns a
//! [`DispatchHandle`]; disposing the handle cancels it at the next await.

use super::acceptor::SubscriptionAcceptorResolver;
use super::context_factory::SubscriptionExecutionContextFactory;
use super::registry::{ActiveDispatchRegistry, DispatchHandle, Preparation};
use super::scheduling;
use crate::adapters::processor_chain::SequentialProcessorChain;
use crate::adapters::tracing_tracer::TracingTracer;
use crate::domain::config::{ConfigError, DispatcherConfig, RetryConfig};
use crate::domain::context::ExecutionPhase;
use crate::domain::error::{DispatchError, DispatchResult};
use crate::domain::subscription::Subscription;
use crate::ports::outbound::{
    AcceptorRegistry, ApiReactor, ProcessorChain, Span, SystemTimeSource, TimeSource, Tracer,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Name of the span opened around each dispatch attempt
pub const DISPATCH_SPAN_NAME: &str = "subscription.dispatch";

/// Completion signal returned by [`SubscriptionDispatcher::dispatch`].
///
/// Resolves once the execution reaches a terminal state. Disposed or
/// replaced executions resolve with `Ok(())`. Dropping the completion does
/// not cancel the execution.
#[must_use = "the completion carries the dispatch outcome"]
pub struct DispatchCompletion {
    state: CompletionState,
}

enum CompletionState {
    Ready(Option<DispatchResult>),
    Pending(oneshot::Receiver<DispatchResult>),
}

impl DispatchCompletion {
    fn ready(result: DispatchResult) -> Self {
        Self {
            state: CompletionState::Ready(Some(result)),
        }
    }

    fn pending(receiver: oneshot::Receiver<DispatchResult>) -> Self {
        Self {
            state: CompletionState::Pending(receiver),
        }
    }

    /// True when the outcome was decided without spawning an execution
    pub fn is_immediate(&self) -> bool {
        matches!(self.state, CompletionState::Ready(_))
    }
}

impl Future for DispatchCompletion {
    type Output = DispatchResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            CompletionState::Pending(receiver) => Pin::new(receiver).poll(cx).map(|outcome| {
                outcome.unwrap_or_else(|_| {
                    Err(DispatchError::Unexpected(
                        "dispatch task dropped before completing".into(),
                    ))
                })
            }),
        }
    }
}

/// Builder for [`SubscriptionDispatcher`]
pub struct SubscriptionDispatcherBuilder {
    acceptors: Arc<dyn AcceptorRegistry>,
    pre_processors: Option<Arc<dyn ProcessorChain>>,
    post_processors: Option<Arc<dyn ProcessorChain>>,
    tracer: Option<Arc<dyn Tracer>>,
    time_source: Option<Arc<dyn TimeSource>>,
    config: DispatcherConfig,
}

impl SubscriptionDispatcherBuilder {
    pub fn pre_processors(mut self, chain: Arc<dyn ProcessorChain>) -> Self {
        self.pre_processors = Some(chain);
        self
    }

    pub fn post_processors(mut self, chain: Arc<dyn ProcessorChain>) -> Self {
        self.post_processors = Some(chain);
        self
    }

    /// Tracer used when `config.tracing.enabled` (defaults to [`TracingTracer`])
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SubscriptionDispatcher, ConfigError> {
        self.config.validate()?;

        let tracer = if self.config.tracing.enabled {
            Some(
                self.tracer
                    .unwrap_or_else(|| Arc::new(TracingTracer::new()) as Arc<dyn Tracer>),
            )
        } else {
            None
        };

        let inner = DispatcherInner {
            resolver: SubscriptionAcceptorResolver::new(self.acceptors),
            context_factory: SubscriptionExecutionContextFactory::new(),
            pre_processors: self.pre_processors.unwrap_or_else(|| {
                Arc::new(SequentialProcessorChain::empty("platform-pre-processors"))
            }),
            post_processors: self.post_processors.unwrap_or_else(|| {
                Arc::new(SequentialProcessorChain::empty("platform-post-processors"))
            }),
            tracer,
            time_source: self
                .time_source
                .unwrap_or_else(|| Arc::new(SystemTimeSource)),
            retry: self.config.retry,
            registry: ActiveDispatchRegistry::new(),
        };

        Ok(SubscriptionDispatcher {
            inner: Arc::new(inner),
        })
    }
}

/// Orchestrates subscription executions, at most one per subscription id
#[derive(Clone)]
pub struct SubscriptionDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    resolver: SubscriptionAcceptorResolver,
    context_factory: SubscriptionExecutionContextFactory,
    pre_processors: Arc<dyn ProcessorChain>,
    post_processors: Arc<dyn ProcessorChain>,
    tracer: Option<Arc<dyn Tracer>>,
    time_source: Arc<dyn TimeSource>,
    retry: RetryConfig,
    registry: ActiveDispatchRegistry,
}

impl SubscriptionDispatcher {
    pub fn builder(acceptors: Arc<dyn AcceptorRegistry>) -> SubscriptionDispatcherBuilder {
        SubscriptionDispatcherBuilder {
            acceptors,
            pre_processors: None,
            post_processors: None,
            tracer: None,
            time_source: None,
            config: DispatcherConfig::default(),
        }
    }

    /// Start, keep, replace or stop the execution of a subscription.
    ///
    /// Must be called from within a tokio runtime. The registry reflects the
    /// decision as soon as this returns; the returned completion resolves
    /// when the execution terminates.
    pub fn dispatch(&self, subscription: Subscription) -> DispatchCompletion {
        let inner = &self.inner;
        let subscription = Arc::new(subscription);
        let now = inner.time_source.now();

        if !subscription.is_dispatchable_at(now) {
            if inner.registry.evict(&subscription.id) {
                info!(
                    subscription_id = %subscription.id,
                    status = %subscription.status,
                    consumer_status = ?subscription.consumer_status,
                    "Disposed subscription that is no longer dispatchable"
                );
            } else {
                debug!(
                    subscription_id = %subscription.id,
                    status = %subscription.status,
                    "Skipping subscription that is not dispatchable"
                );
            }
            return DispatchCompletion::ready(Ok(()));
        }

        match inner.registry.prepare(&subscription) {
            Preparation::Unchanged => {
                debug!(
                    subscription_id = %subscription.id,
                    "Subscription already dispatched with the same configuration"
                );
                return DispatchCompletion::ready(Ok(()));
            }
            Preparation::Replaced => {
                debug!(
                    subscription_id = %subscription.id,
                    force_dispatch = subscription.force_dispatch,
                    "Disposed previous execution before re-dispatching"
                );
            }
            Preparation::Fresh => {}
        }

        let reactor = match inner.resolve_reactor(&subscription) {
            Ok(reactor) => reactor,
            Err(error) => return DispatchCompletion::ready(Err(error)),
        };

        if let Err(error) = inner.context_factory.validate(&subscription) {
            return DispatchCompletion::ready(Err(error));
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                return DispatchCompletion::ready(Err(DispatchError::Unexpected(format!(
                    "no tokio runtime to run subscription {}: {e}",
                    subscription.id
                ))))
            }
        };

        let start_delay = scheduling::duration_until(now, subscription.starting_at);
        let deadline = scheduling::duration_until(now, subscription.ending_at);
        let handle = inner.registry.register(Arc::clone(&subscription));
        let (sender, receiver) = oneshot::channel();

        info!(
            subscription_id = %subscription.id,
            api = %subscription.api,
            generation = handle.generation(),
            start_delay_ms = start_delay.map(|d| d.as_millis() as u64),
            deadline_ms = deadline.map(|d| d.as_millis() as u64),
            "Dispatching subscription"
        );

        runtime.spawn(Arc::clone(inner).run(subscription, reactor, handle, start_delay, deadline, sender));

        DispatchCompletion::pending(receiver)
    }

    /// Dispose every active execution and clear the registry
    pub fn do_stop(&self) -> usize {
        let disposed = self.inner.registry.clear();
        info!(disposed, "Stopped subscription dispatcher");
        disposed
    }

    /// Read-only view of the active dispatch registry
    pub fn registry(&self) -> &ActiveDispatchRegistry {
        &self.inner.registry
    }

    pub fn active_subscription(&self, id: &str) -> Option<Arc<Subscription>> {
        self.inner.registry.active_subscription(id)
    }

    pub fn active_disposable(&self, id: &str) -> Option<DispatchHandle> {
        self.inner.registry.active_disposable(id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl DispatcherInner {
    fn resolve_reactor(&self, subscription: &Subscription) -> DispatchResult<Arc<dyn ApiReactor>> {
        let acceptor = self.resolver.resolve(subscription).ok_or_else(|| {
            DispatchError::not_dispatched(
                &subscription.id,
                format!("no acceptor found for api {}", subscription.api),
            )
        })?;

        acceptor.reactor().ok_or_else(|| {
            DispatchError::not_dispatched(
                &subscription.id,
                format!("no reactor deployed for api {}", subscription.api),
            )
        })
    }

    async fn run(
        self: Arc<Self>,
        subscription: Arc<Subscription>,
        reactor: Arc<dyn ApiReactor>,
        handle: DispatchHandle,
        start_delay: Option<std::time::Duration>,
        deadline: Option<std::time::Duration>,
        completion: oneshot::Sender<DispatchResult>,
    ) {
        let token = handle.token();
        let this = &*self;
        let (sub, reactor) = (&subscription, &reactor);
        let pipeline = scheduling::with_deadline(deadline, async move {
            scheduling::delay(start_delay).await;
            scheduling::retry_with_backoff(&this.retry, &sub.id, move |attempt| {
                this.attempt(sub, reactor, attempt)
            })
            .await
        });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(subscription_id = %subscription.id, "Subscription execution disposed");
                Ok(())
            }
            result = pipeline => result,
        };

        let removed = self.registry.complete(&subscription.id, &handle);
        match &result {
            Ok(()) => debug!(
                subscription_id = %subscription.id,
                removed,
                "Subscription execution completed"
            ),
            Err(error) => debug!(
                subscription_id = %subscription.id,
                removed,
                error = %error,
                "Subscription execution failed"
            ),
        }

        // Receiver may be gone; the registry is already up to date.
        let _ = completion.send(result);
    }

    /// One attempt: pre-processors → reactor → post-processors (always).
    async fn attempt(
        &self,
        subscription: &Arc<Subscription>,
        reactor: &Arc<dyn ApiReactor>,
        attempt: u32,
    ) -> DispatchResult {
        let context = Arc::new(self.context_factory.create(subscription)?);

        let span = AttemptSpan::open(self.tracer.as_deref(), || {
            format!("{DISPATCH_SPAN_NAME} {}", subscription.id)
        });
        if let Some(span) = span.get() {
            span.with_attribute("subscription.id", &subscription.id);
            span.with_attribute("subscription.api", &subscription.api);
            span.with_attribute("request.id", &context.request().id().to_string());
            span.with_attribute("attempt", &attempt.to_string());
            context.set_span(Arc::clone(span));
        }

        debug!(
            subscription_id = %subscription.id,
            request_id = %context.request().id(),
            attempt,
            "Executing subscription"
        );

        let handled = match self
            .pre_processors
            .execute(&context, ExecutionPhase::Request)
            .await
        {
            Ok(()) => reactor.handle(Arc::clone(&context)).await,
            Err(error) => Err(error),
        };
        let post_processed = self
            .post_processors
            .execute(&context, ExecutionPhase::Response)
            .await;

        context.take_span();
        drop(span);

        handled?;
        post_processed?;

        let response = context.response();
        if response.is_status_4xx() || response.is_status_5xx() {
            let message = response
                .body()
                .await
                .map(|body| String::from_utf8_lossy(&body).into_owned())
                .unwrap_or_default();
            debug!(
                subscription_id = %subscription.id,
                status = response.status(),
                "Subscription endpoint answered with an error status"
            );
            return Err(DispatchError::Connection(message));
        }

        Ok(())
    }
}

/// Span of one attempt, ended when dropped (completion or cancellation)
struct AttemptSpan(Option<Arc<dyn Span>>);

impl AttemptSpan {
    fn open(tracer: Option<&dyn Tracer>, name: impl FnOnce() -> String) -> Self {
        Self(tracer.map(|tracer| tracer.span(&name())))
    }

    fn get(&self) -> Option<&Arc<dyn Span>> {
        self.0.as_ref()
    }
}

impl Drop for AttemptSpan {
    fn drop(&mut self) {
        if let Some(span) = self.0.take() {
            span.end();
        }
    }
}
