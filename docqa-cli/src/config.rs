use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use docqa_core::debounce::DEFAULT_PAGE_DEBOUNCE;
use docqa_core::JumpMode;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:5000";
pub const CONFIG_FILE: &str = "config.toml";

/// Viewer settings read from `config.toml`. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub api_base: String,
    pub jump_mode: JumpMode,
    pub show_thumbnails: bool,
    pub page_debounce_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            jump_mode: JumpMode::default(),
            show_thumbnails: true,
            page_debounce_ms: DEFAULT_PAGE_DEBOUNCE.as_millis() as u64,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_base: Option<String>,
    pub confirm_jumps: bool,
    pub hide_thumbnails: bool,
}

impl ViewerConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn apply(mut self, overrides: &Overrides) -> Self {
        if let Some(api_base) = overrides.api_base.as_ref().filter(|s| !s.trim().is_empty()) {
            self.api_base = api_base.trim().to_string();
        }
        if overrides.confirm_jumps {
            self.jump_mode = JumpMode::Confirm;
        }
        if overrides.hide_thumbnails {
            self.show_thumbnails = false;
        }
        self
    }

    pub fn api_base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .with_context(|| format!("invalid API base URL {}", self.api_base))?;
        // Keep a trailing slash so relative joins stay below any path prefix.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn page_debounce(&self) -> Duration {
        Duration::from_millis(self.page_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.jump_mode, JumpMode::Immediate);
        assert_eq!(config.page_debounce(), Duration::from_millis(300));
    }

    #[test]
    fn file_values_then_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "api_base = \"http://relay.internal:8080\"\njump_mode = \"confirm\"\n",
        )
        .unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.api_base, "http://relay.internal:8080");
        assert_eq!(config.jump_mode, JumpMode::Confirm);
        assert!(config.show_thumbnails);

        let config = config.apply(&Overrides {
            api_base: Some("http://localhost:9000".into()),
            confirm_jumps: false,
            hide_thumbnails: true,
        });
        assert_eq!(config.api_base, "http://localhost:9000");
        assert_eq!(config.jump_mode, JumpMode::Confirm);
        assert!(!config.show_thumbnails);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "jump_mode = \"sometimes\"").unwrap();
        assert!(ViewerConfig::load(&path).is_err());
    }

    #[test]
    fn api_base_keeps_path_prefix() {
        let config = ViewerConfig {
            api_base: "https://example.com/docqa".into(),
            ..ViewerConfig::default()
        };
        let base = config.api_base_url().unwrap();
        assert_eq!(base.join("chat").unwrap().as_str(), "https://example.com/docqa/chat");
    }
}
