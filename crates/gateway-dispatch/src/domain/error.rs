//! Dispatch error taxonomy.
//!
//! Callers of [`crate::SubscriptionDispatcher::dispatch`] only ever see a
//! [`DispatchError`]; ineligible or replaced subscriptions complete with
//! `Ok(())` instead.

use super::failure::ExecutionFailure;

/// Dispatch outcome error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// Routing or configuration error: no acceptor, no reactor, bad entrypoint.
    /// Never retried; no registry entry is created.
    #[error("subscription {subscription_id} not dispatched: {reason}")]
    NotDispatched {
        subscription_id: String,
        reason: String,
    },

    /// Upstream answered with a 4xx/5xx status; retried per policy
    #[error("subscription connection failed: {0}")]
    Connection(String),

    /// Processing error that must not be retried (e.g. malformed message)
    #[error("subscription processing failed: {0}")]
    Processing(String),

    /// Structured failure raised through the execution context
    #[error("execution interrupted: {0}")]
    InterruptionFailure(ExecutionFailure),

    /// Execution interrupted without a failure payload
    #[error("execution interrupted")]
    Interrupted,

    /// Anything else raised by a reactor or processor
    #[error("unexpected dispatch error: {0}")]
    Unexpected(String),
}

impl DispatchError {
    pub fn not_dispatched(subscription_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotDispatched {
            subscription_id: subscription_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the retry loop may attempt again after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotDispatched { .. } | Self::Processing(_))
    }

    /// Failure payload when this is an interruption failure
    pub fn execution_failure(&self) -> Option<&ExecutionFailure> {
        match self {
            Self::InterruptionFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<ExecutionFailure> for DispatchError {
    fn from(failure: ExecutionFailure) -> Self {
        Self::InterruptionFailure(failure)
    }
}

impl From<ProxyError> for DispatchError {
    fn from(error: ProxyError) -> Self {
        Self::Unexpected(error.to_string())
    }
}

/// Result type for dispatch operations
pub type DispatchResult<T = ()> = Result<T, DispatchError>;

/// Errors of the proxy bridge streams
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    /// A proxy response accepts exactly one subscriber
    #[error("proxy response already subscribed")]
    AlreadySubscribed,

    /// Upstream header or trailer that cannot be represented
    #[error("invalid upstream header: {0}")]
    InvalidHeader(String),

    /// Request or response body stream failed
    #[error("body stream failed: {0}")]
    Stream(String),
}

/// Errors raised synchronously by a legacy invoker
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokerError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invoker failed: {0}")]
    Other(String),
}
