use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigStore;
use crate::errors::types::{Error, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open/close events
    pub log_spans: bool,
    /// Application name logged at startup
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "rvoip-media".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Read the `[logging]` section of a configuration store
    ///
    /// An unparsable level falls back to `INFO`.
    pub fn from_store(store: &ConfigStore) -> Self {
        let defaults = Self::default();
        let level = store
            .get_opt_string("logging", "level")
            .and_then(|text| parse_log_level(&text).ok())
            .unwrap_or(defaults.level);
        LoggingConfig {
            level,
            json: store.get_bool("logging", "json", defaults.json),
            file_info: store.get_bool("logging", "file_info", defaults.file_info),
            log_spans: store.get_bool("logging", "spans", defaults.log_spans),
            app_name: store.get_string("logging", "app_name", &defaults.app_name),
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber, failing if one is already set
pub fn try_setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Logging(e.to_string()))?;

    tracing::info!("Starting {} v{}", config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Install the global subscriber
///
/// A subscriber installed earlier (by a test harness for instance) is kept
/// and the call succeeds.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    match try_setup_logging(config) {
        Ok(()) => Ok(()),
        Err(Error::Logging(reason)) => {
            tracing::debug!("Keeping existing subscriber: {}", reason);
            Ok(())
        }
        Err(other) => Err(other),
    }
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn reads_logging_section() {
        let mut store = ConfigStore::new();
        store.set_string("logging", "level", "trace");
        store.set_bool("logging", "json", true);
        let config = LoggingConfig::from_store(&store);
        assert_eq!(config.level, Level::TRACE);
        assert!(config.json);
        assert!(!config.file_info);
    }

    #[test]
    fn bad_level_falls_back_to_info() {
        let mut store = ConfigStore::new();
        store.set_string("logging", "level", "chatty");
        assert_eq!(LoggingConfig::from_store(&store).level, Level::INFO);
    }

    #[test]
    #[serial]
    fn setup_is_idempotent() {
        assert!(setup_logging(LoggingConfig::default()).is_ok());
        assert!(setup_logging(LoggingConfig::default()).is_ok());
        assert!(try_setup_logging(LoggingConfig::default()).is_err());
    }
}
