//! Configuration file support

use gf_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:4000";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Configuration for gf
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL
    pub api_base: Option<String>,
    /// Bearer token (alternative to GF_TOKEN)
    pub token: Option<String>,
    /// Conversation to sync
    pub conversation_id: Option<String>,
    /// Streaming summary endpoint
    pub summary_url: Option<String>,
    /// Summary language code
    pub language: Option<String>,
    /// Messages per full fetch
    pub message_limit: Option<u32>,
    pub message_poll_ms: Option<u64>,
    pub typing_poll_ms: Option<u64>,
    pub full_sync_ms: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gradientflow")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("GF_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file. Missing or broken files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            api_base: Some(DEFAULT_API_BASE.to_string()),
            language: Some(DEFAULT_LANGUAGE.to_string()),
            ..Default::default()
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    /// Bearer token, checking config then env
    pub fn token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("GF_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }

    /// Engine settings, falling back to the engine defaults
    pub fn sync_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            conversation_id: self
                .conversation_id
                .clone()
                .unwrap_or(defaults.conversation_id),
            message_limit: self.message_limit.unwrap_or(defaults.message_limit),
            message_poll_interval: self
                .message_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.message_poll_interval),
            typing_poll_interval: self
                .typing_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.typing_poll_interval),
            full_sync_interval: self
                .full_sync_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.full_sync_interval),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# gf configuration file
# Place at ~/.config/gradientflow/config.toml (Linux) or set GF_CONFIG_PATH

# Backend base URL
api_base = "http://localhost:4000"

# Bearer token (optional - GF_TOKEN works too, or use `gf --login <email>`)
# token = "..."

# Conversation to sync
# conversation_id = "global"

# Streaming summary endpoint (required for --summarize)
# summary_url = "http://localhost:4000/summary/stream"

# Summary language
language = "en"

# Polling (milliseconds)
# message_limit = 100
# message_poll_ms = 4000
# typing_poll_ms = 2500
# full_sync_ms = 30000
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("gf-config-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base(), "http://localhost:4000");
        assert_eq!(config.language(), "en");

        let sync = config.sync_config();
        assert_eq!(sync.conversation_id, "global");
        assert_eq!(sync.message_limit, 100);
        assert_eq!(sync.message_poll_interval, Duration::from_millis(4_000));
        assert_eq!(sync.typing_poll_interval, Duration::from_millis(2_500));
        assert_eq!(sync.full_sync_interval, Duration::from_millis(30_000));
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.api_base(), DEFAULT_API_BASE);
        assert_eq!(config.language(), DEFAULT_LANGUAGE);
        assert!(config.summary_url.is_none());
    }

    #[test]
    fn test_overrides_reach_sync_config() {
        let config: Config = toml::from_str(
            r#"
            conversation_id = "team"
            message_limit = 20
            message_poll_ms = 1000
            full_sync_ms = 5000
            "#,
        )
        .unwrap();
        let sync = config.sync_config();
        assert_eq!(sync.conversation_id, "team");
        assert_eq!(sync.message_limit, 20);
        assert_eq!(sync.message_poll_interval, Duration::from_secs(1));
        assert_eq!(sync.typing_poll_interval, Duration::from_millis(2_500));
        assert_eq!(sync.full_sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let config = Config {
            api_base: Some("https://chat.example.com".into()),
            summary_url: Some("https://chat.example.com/summary".into()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_or_broken_file_yields_defaults() {
        let path = temp_path();
        assert_eq!(Config::load_from(&path), Config::default());

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "api_base = [not toml").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
