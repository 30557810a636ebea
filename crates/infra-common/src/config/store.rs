use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::context::{ErrorContext, ErrorExt};
use crate::errors::types::{Error, Result};

/// Source of configuration data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Configuration from default values
    Default,
    /// Configuration from file
    File,
    /// Configuration set programmatically
    Api,
}

/// Section/key configuration store
///
/// Sections may contain `::` (for example `alerts::video`); in TOML such
/// section names must be quoted: `["alerts::video"]`.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    sections: BTreeMap<String, BTreeMap<String, String>>,
    source: Option<ConfigSource>,
}

impl ConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            sections: BTreeMap::new(),
            source: Some(ConfigSource::Default),
        }
    }

    /// Parse a store from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: toml::Table = text.parse()?;
        let mut store = Self::new();
        store.source = Some(ConfigSource::File);

        for (section, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(Error::Parse(format!(
                    "top-level key '{}' is not a section",
                    section
                )));
            };
            for (key, value) in entries {
                match scalar_to_string(&value) {
                    Some(text) => store.set_string(&section, &key, text),
                    None => warn!(
                        "Ignoring non scalar configuration value {}.{}",
                        section, key
                    ),
                }
            }
        }
        debug!("Loaded configuration with {} sections", store.sections.len());
        Ok(store)
    }

    /// Load a store from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(Error::from)
            .context(ErrorContext::new("config", "read").with_details(path.display().to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Where the content of this store came from
    pub fn source(&self) -> ConfigSource {
        self.source.unwrap_or(ConfigSource::Default)
    }

    /// Check whether a key is present
    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.raw(section, key).is_some()
    }

    /// Check whether a section is present
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Raw string value, if present
    pub fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(key))
            .map(String::as_str)
    }

    /// Get a string value or the default
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.raw(section, key).unwrap_or(default).to_string()
    }

    /// Get an optional, non-empty string value
    pub fn get_opt_string(&self, section: &str, key: &str) -> Option<String> {
        self.raw(section, key)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Get a boolean value (`1`/`0`, `true`/`false`, `yes`/`no`) or the default
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.raw(section, key) {
            None => default,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    warn!("Invalid boolean '{}' for {}.{}, using default", other, section, key);
                    default
                }
            },
        }
    }

    /// Get an integer value or the default
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.raw(section, key) {
            None => default,
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid integer '{}' for {}.{}, using default", value, section, key);
                default
            }),
        }
    }

    /// Get a float value or the default
    pub fn get_float(&self, section: &str, key: &str, default: f32) -> f32 {
        match self.raw(section, key) {
            None => default,
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid float '{}' for {}.{}, using default", value, section, key);
                default
            }),
        }
    }

    /// Set a string value
    pub fn set_string<S: Into<String>>(&mut self, section: &str, key: &str, value: S) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        if self.source.is_none() || self.source == Some(ConfigSource::Default) {
            self.source = Some(ConfigSource::Api);
        }
    }

    /// Set a boolean value
    pub fn set_bool(&mut self, section: &str, key: &str, value: bool) {
        self.set_string(section, key, if value { "1" } else { "0" });
    }

    /// Set an integer value
    pub fn set_int(&mut self, section: &str, key: &str, value: i64) {
        self.set_string(section, key, value.to_string());
    }

    /// Set a float value
    pub fn set_float(&mut self, section: &str, key: &str, value: f32) {
        self.set_string(section, key, value.to_string());
    }

    /// Remove a key, returning its previous value
    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        self.sections.get_mut(section).and_then(|entries| entries.remove(key))
    }

    /// Keys of a section
    pub fn keys(&self, section: &str) -> Vec<String> {
        self.sections
            .get(section)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(if *b { "1".into() } else { "0".into() }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[video]
main_display_mode = "BlackBars"
framerate = 24.5
fallback_to_dummy_codec = false
rtp_io = 1

["alerts::video"]
fps_threshold = 12
"#;

    #[test]
    fn parses_sections_and_quoted_names() {
        let store = ConfigStore::from_toml_str(SAMPLE).unwrap();
        assert_eq!(store.source(), ConfigSource::File);
        assert_eq!(store.get_string("video", "main_display_mode", "Hybrid"), "BlackBars");
        assert_eq!(store.get_float("video", "framerate", 0.0), 24.5);
        assert!(!store.get_bool("video", "fallback_to_dummy_codec", true));
        assert!(store.get_bool("video", "rtp_io", false));
        assert_eq!(store.get_int("alerts::video", "fps_threshold", 10), 12);
    }

    #[test]
    fn defaults_apply_to_missing_and_malformed_values() {
        let mut store = ConfigStore::new();
        store.set_string("video", "framerate", "fast");
        assert_eq!(store.get_float("video", "framerate", 15.0), 15.0);
        assert_eq!(store.get_int("video", "missing", 7), 7);
        assert!(store.get_bool("video", "missing", true));
        assert_eq!(store.get_opt_string("video", "missing"), None);
    }

    #[test]
    fn setters_round_trip_through_getters() {
        let mut store = ConfigStore::new();
        store.set_bool("sip", "zrtp_go_clear", true);
        store.set_int("conference", "max_participants", 9);
        assert!(store.get_bool("sip", "zrtp_go_clear", false));
        assert_eq!(store.get_int("conference", "max_participants", 0), 9);
        assert_eq!(store.keys("sip"), vec!["zrtp_go_clear".to_string()]);
        assert_eq!(store.remove("sip", "zrtp_go_clear"), Some("1".to_string()));
        assert!(!store.has_key("sip", "zrtp_go_clear"));
    }

    #[test]
    fn rejects_top_level_scalars() {
        assert!(ConfigStore::from_toml_str("level = 3").is_err());
    }
}
