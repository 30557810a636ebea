use std::collections::BTreeMap;
use std::fmt;

use tracing::{Level, Span};

/// Context attached to the log lines of a media component
///
/// Carries the component name plus the identifiers (call, stream, conference)
/// the logs relate to, so that interleaved output of several calls can be
/// told apart.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: String,
    /// Call the component works for
    pub call_id: Option<String>,
    /// Stream index inside the call
    pub stream_index: Option<usize>,
    /// Additional contextual fields
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context with just the component name
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            ..Default::default()
        }
    }

    /// Attach the call identifier
    pub fn with_call<S: Into<String>>(mut self, call_id: S) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Attach the stream index
    pub fn with_stream(mut self, index: usize) -> Self {
        self.stream_index = Some(index);
        self
    }

    /// Add a field to the context
    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a span carrying this context
    pub fn span(&self, level: Level) -> Span {
        let call = self.call_id.as_deref().unwrap_or("-");
        let stream = self.stream_index.map(|i| i as i64).unwrap_or(-1);
        let fields = self.fields_string();
        match level {
            Level::TRACE => tracing::trace_span!("media", component = %self.component, call = %call, stream, fields = %fields),
            Level::DEBUG => tracing::debug_span!("media", component = %self.component, call = %call, stream, fields = %fields),
            Level::INFO => tracing::info_span!("media", component = %self.component, call = %call, stream, fields = %fields),
            Level::WARN => tracing::warn_span!("media", component = %self.component, call = %call, stream, fields = %fields),
            Level::ERROR => tracing::error_span!("media", component = %self.component, call = %call, stream, fields = %fields),
        }
    }

    /// Run a closure inside this context's span
    pub fn in_scope<F, R>(&self, level: Level, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.span(level).in_scope(f)
    }

    fn fields_string(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;
        if let Some(call) = &self.call_id {
            write!(f, "[call={}]", call)?;
        }
        if let Some(index) = self.stream_index {
            write!(f, "[stream={}]", index)?;
        }
        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_identifiers_in_order() {
        let ctx = LogContext::new("video-stream")
            .with_call("c1")
            .with_stream(2)
            .with_field("label", "alice")
            .with_field("dir", "sendrecv");
        assert_eq!(
            ctx.to_string(),
            "[video-stream][call=c1][stream=2][dir=sendrecv][label=alice]"
        );
    }

    #[test]
    fn in_scope_returns_closure_value() {
        let ctx = LogContext::new("streams-group");
        assert_eq!(ctx.in_scope(Level::DEBUG, || 41 + 1), 42);
    }
}
