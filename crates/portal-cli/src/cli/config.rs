use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use portal_core::FeedConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// JSON dump of the document store to operate on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dump: Option<PathBuf>,

    /// Default user for commands that need one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Feed tuning; defaults apply when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedConfig>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// `~/.config/portal/cli.json` when it exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("portal").join("cli.json"))
            .filter(|path| path.exists())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    /// The feed section, validated.
    pub fn feed_config(&self) -> Result<FeedConfig> {
        let feed = self.feed.clone().unwrap_or_default();
        feed.validate().context("Invalid feed config")?;
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config_with_store_dump() {
        let json = r#"{"storeDump": "/tmp/portal.json", "user": "u1"}"#;
        let config = CliConfig::from_json(json).unwrap();
        assert_eq!(config.store_dump, Some(PathBuf::from("/tmp/portal.json")));
        assert_eq!(config.user.as_deref(), Some("u1"));
        assert!(config.feed.is_none());
    }

    #[test]
    fn test_parse_config_with_feed_overrides() {
        let json = r#"{"feed": {"renderLimit": 3, "canonicalPath": "log"}}"#;
        let config = CliConfig::from_json(json).unwrap();
        let feed = config.feed_config().unwrap();
        assert_eq!(feed.render_limit, 3);
        assert_eq!(feed.canonical_path, "log");
        assert_eq!(feed.badge_cap, FeedConfig::default().badge_cap);
    }

    #[test]
    fn test_parse_config_minimal() {
        let config = CliConfig::from_json("{}").unwrap();
        assert!(config.store_dump.is_none());
        assert_eq!(config.feed_config().unwrap(), FeedConfig::default());
    }

    #[test]
    fn test_invalid_feed_config_rejected() {
        let config = CliConfig::from_json(r#"{"feed": {"renderDebounceMs": 0}}"#).unwrap();
        assert!(config.feed_config().is_err());
    }

    #[test]
    fn test_load_round_trips_through_file() {
        let config = CliConfig {
            store_dump: Some(PathBuf::from("db.json")),
            user: None,
            feed: None,
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = CliConfig::load(file.path()).unwrap();
        assert_eq!(loaded.store_dump, config.store_dump);
        assert!(!loaded.to_json().unwrap().contains("\"user\""));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = CliConfig::load(Path::new("/nonexistent/portal-cli.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
