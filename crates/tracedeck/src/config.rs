//! Session configuration.

use crate::entry::{EVENT_VIEW, GRAPH_VIEW, PLUGIN_UNTOUCHED, TEXT_VIEW};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of simultaneously open streams.
pub const DEFAULT_MAX_STREAMS: usize = 127;

/// Default filter mask: every consumer view.
pub const DEFAULT_FILTER_MASK: u8 = TEXT_VIEW | GRAPH_VIEW | EVENT_VIEW;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Visibility bits cleared by coarse (task and CPU) filtering.
    pub filter_mask: u8,
    /// Upper bound on open streams.
    pub max_streams: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter_mask: DEFAULT_FILTER_MASK,
            max_streams: DEFAULT_MAX_STREAMS,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.filter_mask & PLUGIN_UNTOUCHED != 0 {
            return Err(Error::Config(format!(
                "filter_mask {:#04x} includes the plugin bit {:#04x}",
                self.filter_mask, PLUGIN_UNTOUCHED
            )));
        }
        if self.max_streams == 0 || self.max_streams > usize::from(u16::MAX) + 1 {
            return Err(Error::Config(format!(
                "max_streams must be in 1..={}, got {}",
                usize::from(u16::MAX) + 1,
                self.max_streams
            )));
        }
        Ok(())
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    /// Load and validate config from a JSON file. Missing fields take
    /// their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_cover_every_view() {
        let config = SessionConfig::default();
        assert_eq!(config.filter_mask, TEXT_VIEW | GRAPH_VIEW | EVENT_VIEW);
        assert_eq!(config.max_streams, 127);
        config.validate().unwrap();
    }

    #[test]
    fn save_and_load_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let config = SessionConfig {
            filter_mask: TEXT_VIEW,
            max_streams: 4,
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "filter_mask": 2 }"#).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.filter_mask, TEXT_VIEW);
        assert_eq!(config.max_streams, DEFAULT_MAX_STREAMS);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad_mask = SessionConfig {
            filter_mask: TEXT_VIEW | PLUGIN_UNTOUCHED,
            ..SessionConfig::default()
        };
        assert!(matches!(bad_mask.validate(), Err(Error::Config(_))));

        let no_streams = SessionConfig {
            max_streams: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(no_streams.validate(), Err(Error::Config(_))));

        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(SessionConfig::load(&path), Err(Error::Config(_))));
    }
}
