//! Connection handler adapter: upstream response event → single-shot completion.

use super::flowable::FlowableProxyResponse;
use super::CompletionEmitter;
use crate::domain::context::ExecutionContext;
use crate::domain::error::{DispatchError, ProxyError};
use crate::domain::failure::ExecutionFailure;
use crate::ports::proxy::{ConnectionHandler, ProxyConnection, ProxyResponse, RawHeaders};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Status reported when an upstream never connected and gave no status
pub const DEFAULT_UNAVAILABLE_STATUS: u16 = 503;

/// Receives the legacy connection and reports its response exactly once
#[derive(Clone)]
pub struct ConnectionHandlerAdapter {
    context: Arc<ExecutionContext>,
    flowable: FlowableProxyResponse,
    emitter: CompletionEmitter,
}

impl ConnectionHandlerAdapter {
    pub fn new(
        context: Arc<ExecutionContext>,
        flowable: FlowableProxyResponse,
        emitter: CompletionEmitter,
    ) -> Self {
        Self {
            context,
            flowable,
            emitter,
        }
    }

    pub fn flowable(&self) -> &FlowableProxyResponse {
        &self.flowable
    }

    /// Bridge the upstream response to the local response and the emitter
    pub fn handle_proxy_response(
        &self,
        connection: Arc<dyn ProxyConnection>,
        response: Arc<dyn ProxyResponse>,
    ) {
        if !response.connected() {
            let failure = unavailable_failure(response.as_ref());
            debug!(
                request_id = %self.context.request().id(),
                status = failure.status_code,
                key = ?failure.key,
                "Upstream connection failed"
            );
            self.emitter.try_error(self.context.interrupt_with(failure));
            return;
        }

        let local = self.context.response();
        if local.is_ended() {
            self.emitter.try_success();
            return;
        }

        self.flowable.initialize(connection, Arc::clone(&response));

        if let Err(e) = self.copy_status_and_headers(response.as_ref()) {
            warn!(request_id = %self.context.request().id(), error = %e, "Cannot copy upstream response");
            self.flowable.cancel();
            self.emitter.try_error(DispatchError::from(e));
            return;
        }

        let context = Arc::clone(&self.context);
        let upstream = Arc::clone(&response);
        self.flowable.on_complete(move || {
            match to_header_map(&upstream.trailers()) {
                Ok(trailers) => context.response().with_trailers(|local| local.extend(trailers)),
                Err(e) => warn!(
                    request_id = %context.request().id(),
                    error = %e,
                    "Ignoring invalid upstream trailers"
                ),
            }
        });

        self.emitter.try_success();
    }

    fn copy_status_and_headers(&self, response: &dyn ProxyResponse) -> Result<(), ProxyError> {
        let headers = to_header_map(&response.headers())?;
        let local = self.context.response();
        if let Some(status) = response.status() {
            local.set_status(status);
        }
        if let Some(reason) = response.reason() {
            local.set_reason(reason);
        }
        local.with_headers(|local| local.extend(headers));
        Ok(())
    }
}

impl ConnectionHandler for ConnectionHandlerAdapter {
    fn handle(&self, connection: Arc<dyn ProxyConnection>) {
        let adapter = self.clone();
        let owner = Arc::clone(&connection);
        connection.response_handler(Box::new(move |response| {
            adapter.handle_proxy_response(owner, response);
        }));
    }
}

fn unavailable_failure(response: &dyn ProxyResponse) -> ExecutionFailure {
    let mut failure = ExecutionFailure::new(response.status().unwrap_or(DEFAULT_UNAVAILABLE_STATUS));
    if let Some(details) = response.processor_failure() {
        failure.key = details.key;
        failure.message = details.message;
        failure.content_type = details.content_type;
        failure.parameters = details.parameters;
    }
    failure
}

/// Convert legacy header pairs, keeping repeated names
pub(crate) fn to_header_map(raw: &RawHeaders) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProxyError::InvalidHeader(name.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}
