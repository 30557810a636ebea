/*!
Logging

`tracing` subscriber setup driven by [`LoggingConfig`], and [`LogContext`]
spans carrying the component and the call/stream the log lines belong to.
*/

pub mod context;
pub mod setup;

pub use context::LogContext;
pub use setup::{parse_log_level, setup_logging, try_setup_logging, LoggingConfig};
