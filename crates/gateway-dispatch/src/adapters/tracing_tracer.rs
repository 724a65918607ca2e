//! [`Tracer`] backed by `tracing` spans.

use crate::ports::outbound::{Span, Tracer};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::field;

/// Opens one `tracing` span per dispatch attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl TracingTracer {
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for TracingTracer {
    fn span(&self, name: &str) -> Arc<dyn Span> {
        let span = tracing::info_span!(
            "dispatch",
            otel.name = name,
            subscription.id = field::Empty,
            subscription.api = field::Empty,
            request.id = field::Empty,
            attempt = field::Empty,
        );
        Arc::new(TracingSpan {
            span: Mutex::new(Some(span)),
        })
    }
}

/// Span closed when `end` is called
pub struct TracingSpan {
    span: Mutex<Option<tracing::Span>>,
}

impl TracingSpan {
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.span.lock().is_none()
    }
}

impl Span for TracingSpan {
    fn with_attribute(&self, key: &str, value: &str) {
        // Only fields declared at creation are recorded
        if let Some(span) = self.span.lock().as_ref() {
            span.record(key, value);
        }
    }

    fn end(&self) {
        self.span.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_closes_span() {
        let tracer = TracingTracer::new();
        let span = tracer.span("subscription.dispatch sub-1");
        span.with_attribute("subscription.id", "sub-1");
        span.with_attribute("unknown", "ignored");
        span.end();
        span.end();
        span.with_attribute("attempt", "2");
    }

    #[test]
    fn test_tracing_span_state() {
        let span = TracingSpan {
            span: Mutex::new(Some(tracing::info_span!("test"))),
        };
        assert!(!span.is_ended());
        span.end();
        assert!(span.is_ended());
    }
}
