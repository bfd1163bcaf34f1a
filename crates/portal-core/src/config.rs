use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    channels, ACTIVITY_PATH, BADGE_CAP, CHANNEL_ROOT, RECENT_ACTIVITY_LIMIT, RENDER_DEBOUNCE_MS,
    RENDER_LIMIT, USERS_PATH,
};
use crate::error::{PortalError, Result};
use crate::models::Role;

/// Feed configuration, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedConfig {
    pub canonical_path: String,
    pub channel_root: String,
    pub users_path: String,
    pub render_debounce_ms: u64,
    pub render_limit: usize,
    pub badge_cap: usize,
    pub recent_activity_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            canonical_path: ACTIVITY_PATH.to_string(),
            channel_root: CHANNEL_ROOT.to_string(),
            users_path: USERS_PATH.to_string(),
            render_debounce_ms: RENDER_DEBOUNCE_MS,
            render_limit: RENDER_LIMIT,
            badge_cap: BADGE_CAP,
            recent_activity_limit: RECENT_ACTIVITY_LIMIT,
        }
    }
}

impl FeedConfig {
    /// Load config from a JSON file. Missing keys fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: FeedConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.canonical_path.trim_matches('/').is_empty() {
            return Err(PortalError::Config {
                message: "canonicalPath must not be empty".to_string(),
            });
        }
        if self.render_debounce_ms == 0 {
            return Err(PortalError::Config {
                message: "renderDebounceMs must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn render_debounce(&self) -> Duration {
        Duration::from_millis(self.render_debounce_ms)
    }

    pub fn channel_path(&self, channel: &str) -> String {
        format!("{}/{}", self.channel_root.trim_end_matches('/'), channel)
    }

    /// Channels a role listens to. Members only get the public channel;
    /// staff add the staff channel; admins get all three.
    pub fn channel_paths_for(&self, role: Role) -> Vec<String> {
        let names: &[&str] = match role {
            Role::Member => &[channels::PUBLIC],
            Role::Staff => &[channels::PUBLIC, channels::STAFF],
            Role::Admin => &[channels::PUBLIC, channels::STAFF, channels::ADMIN],
        };
        names.iter().map(|name| self.channel_path(name)).collect()
    }

    pub fn user_path(&self, user_id: &str) -> String {
        format!("{}/{}", self.users_path.trim_end_matches('/'), user_id)
    }
}
