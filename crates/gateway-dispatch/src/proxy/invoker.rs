//! Legacy callback invoker behind the async [`Invoker`] port.

use super::connection::ConnectionHandlerAdapter;
use super::flowable::FlowableProxyResponse;
use super::stream_adapter::ReadWriteStreamAdapter;
use super::CompletionEmitter;
use crate::domain::config::DispatcherConfig;
use crate::domain::context::ExecutionContext;
use crate::domain::error::{DispatchError, DispatchResult};
use crate::domain::failure::{keys, ExecutionFailure};
use crate::ports::outbound::Invoker;
use crate::ports::proxy::{ConnectionHandler, LegacyInvoker, RequestStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message recorded when the caller goes away mid-invocation
pub const CLIENT_ABORTED_MESSAGE: &str = "The client aborted the request during the response";

/// Wraps a [`LegacyInvoker`] into a single completion
pub struct InvokerAdapter {
    legacy: Arc<dyn LegacyInvoker>,
    prefetch: u64,
}

impl InvokerAdapter {
    /// `prefetch` is the demand granted per batch on the proxied body
    pub fn new(legacy: Arc<dyn LegacyInvoker>, prefetch: u64) -> Self {
        Self {
            legacy,
            prefetch: prefetch.max(1),
        }
    }

    /// Uses `proxy.prefetch` as the per-batch demand
    pub fn from_config(legacy: Arc<dyn LegacyInvoker>, config: &DispatcherConfig) -> Self {
        Self::new(legacy, config.proxy.prefetch)
    }
}

#[async_trait]
impl Invoker for InvokerAdapter {
    fn id(&self) -> &str {
        self.legacy.id()
    }

    async fn invoke(&self, context: Arc<ExecutionContext>) -> DispatchResult {
        let (emitter, signal) = CompletionEmitter::new();
        let flowable = FlowableProxyResponse::new();
        let request = Arc::new(ReadWriteStreamAdapter::new(
            context.request().take_chunks(),
            emitter.clone(),
        ));
        let handler = Arc::new(ConnectionHandlerAdapter::new(
            Arc::clone(&context),
            flowable.clone(),
            emitter,
        ));

        let mut adaptation = ContextAdaptation::begin(&context, &request, &flowable);

        let invoked = self.legacy.invoke(
            &context,
            Arc::clone(&request) as Arc<dyn RequestStream>,
            handler as Arc<dyn ConnectionHandler>,
        );

        if let Err(e) = invoked {
            warn!(
                request_id = %context.request().id(),
                invoker = self.legacy.id(),
                error = %e,
                "Legacy invoker failed before connecting"
            );
            adaptation.finish();
            context.response().set_chunks(futures::stream::empty().boxed());
            return Err(context.interrupt_with(ExecutionFailure::bad_gateway(e.to_string())));
        }

        let outcome = signal.await.unwrap_or_else(|_| {
            Err(DispatchError::Unexpected(
                "connection handler dropped without completing".into(),
            ))
        });
        adaptation.finish();

        match outcome {
            Ok(()) => {
                context
                    .response()
                    .set_chunks(flowable.subscribe().prefetch(self.prefetch).boxed());
                Ok(())
            }
            // Interruption failures from the connection handler keep their payload
            Err(error) => {
                context.response().set_chunks(futures::stream::empty().boxed());
                Err(error)
            }
        }
    }
}

/// Marks the context as adapted for the duration of one invocation and
/// restores it exactly once, on completion or when the invocation future is
/// dropped (cancellation).
struct ContextAdaptation<'a> {
    context: &'a ExecutionContext,
    request: &'a ReadWriteStreamAdapter,
    flowable: &'a FlowableProxyResponse,
    restored: bool,
}

impl<'a> ContextAdaptation<'a> {
    fn begin(
        context: &'a ExecutionContext,
        request: &'a ReadWriteStreamAdapter,
        flowable: &'a FlowableProxyResponse,
    ) -> Self {
        context.set_invoker_adapted(true);
        Self {
            context,
            request,
            flowable,
            restored: false,
        }
    }

    fn finish(&mut self) {
        if !self.restored {
            self.restored = true;
            self.context.set_invoker_adapted(false);
        }
    }
}

impl Drop for ContextAdaptation<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.finish();
        self.request.cancel();
        self.flowable.cancel();
        self.context.request().with_metrics(|metrics| {
            metrics.error_key = Some(keys::CLIENT_ABORTED_DURING_RESPONSE_ERROR.to_string());
            metrics.error_message = Some(CLIENT_ABORTED_MESSAGE.to_string());
        });
        debug!(
            request_id = %self.context.request().id(),
            "Invocation cancelled before completion"
        );
    }
}
