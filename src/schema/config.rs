/// Story configuration — read from the `CONFIG` passage.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Effective configuration for a story.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryConfig {
    #[serde(default)]
    pub dark_theme: bool,
    #[serde(default)]
    pub stylesheets: Vec<String>,
    /// Keys the engine does not interpret, kept for templates and hosts.
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// Keys a `CONFIG` passage explicitly sets. Absent keys keep defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigOverrides {
    dark_theme: Option<bool>,
    stylesheets: Option<Vec<String>>,
    #[serde(flatten)]
    extra: toml::Table,
}

impl StoryConfig {
    /// Parse a `CONFIG` passage body and merge it over the defaults.
    pub fn from_toml(source: &str) -> Result<StoryConfig, ConfigError> {
        let mut config = StoryConfig::default();
        config.merge_toml(source)?;
        Ok(config)
    }

    /// Merge a TOML document over this config. Keys the document sets win.
    pub fn merge_toml(&mut self, source: &str) -> Result<(), ConfigError> {
        let overrides: ConfigOverrides = toml::from_str(source)?;
        if let Some(dark) = overrides.dark_theme {
            self.dark_theme = dark;
        }
        if let Some(sheets) = overrides.stylesheets {
            self.stylesheets = sheets;
        }
        for (key, value) in overrides.extra {
            self.extra.insert(key, value);
        }
        Ok(())
    }

    /// The config as a JSON value, for template access.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
