//! Logging setup for processes embedding the dispatch engine.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GW_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` overrides) |
//! | `GW_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |
//! | `GW_CONSOLE_OUTPUT` | `true` | Print logs to stdout |

mod config;
mod logging;

pub use config::LoggingConfig;
pub use logging::init_logging;

/// Telemetry errors
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}
