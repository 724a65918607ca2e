//! Structured execution failure carried through interruptions.
//!
//! Same shape as an HTTP error answer: status, machine-readable key,
//! human message, content type and free-form parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Well-known failure keys
pub mod keys {
    /// Invoker raised before any upstream connection was made
    pub const GATEWAY_CLIENT_CONNECTION_ERROR: &str = "GATEWAY_CLIENT_CONNECTION_ERROR";
    /// Caller went away while the response was still streaming
    pub const CLIENT_ABORTED_DURING_RESPONSE_ERROR: &str = "CLIENT_ABORTED_DURING_RESPONSE_ERROR";
}

/// Execution failure raised through [`crate::ExecutionContext::interrupt_with`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl ExecutionFailure {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            key: None,
            message: None,
            content_type: None,
            parameters: Map::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// 502 raised when the legacy invoker fails before connecting
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(502)
            .key(keys::GATEWAY_CLIENT_CONNECTION_ERROR)
            .message(message)
    }

    /// 503 used when an upstream never connected and reported no status
    pub fn service_unavailable() -> Self {
        Self::new(503)
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.status_code)?;
        if let Some(key) = &self.key {
            write!(f, " {key}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionFailure {}
