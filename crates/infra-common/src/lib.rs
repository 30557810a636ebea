//! # Infrastructure Common
//!
//! Shared infrastructure used by every crate of the media stack:
//!
//! - [`config`]: the section/key configuration store read by stream and conference layers
//! - [`logging`]: `tracing` subscriber setup and contextual logging helpers
//! - [`errors`]: the common error type and error context helpers

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{ConfigSource, ConfigStore};
pub use errors::{Error, ErrorContext, ErrorExt, Result};
pub use logging::{setup_logging, try_setup_logging, LogContext, LoggingConfig};
