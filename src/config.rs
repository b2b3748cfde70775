//! Configuration directory resolution and settings for conline.
//!
//! This module provides:
//! - Configuration directory lookup, optionally overridden by the injector
//! - TOML settings loading from `<config dir>/settings.toml`
//! - The process-lifetime `SettingsStore`
//!
//! # Settings File
//!
//! ```toml
//! # Ctrl-D at an empty line exits the shell
//! ctrld_exits = true
//!
//! # Maximum number of persisted history lines
//! history_limit = 1000
//!
//! # error, warn, info, debug, trace
//! log_level = "info"
//!
//! [auto_answer]
//! # off, yes, no
//! mode = "yes"
//! prompts = ["Terminate batch job (Y/N)?"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Directory name used below the per-user base directory
const CONFIG_DIR_NAME: &str = "conline";

/// Settings file name inside the configuration directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Resolve the configuration directory.
///
/// A non-empty `override_path` always wins. The directory is created if it
/// does not exist yet; creation failures are ignored here and surface later
/// when something is written into it.
pub fn resolve_config_dir(override_path: Option<&Path>) -> PathBuf {
    let dir = match override_path {
        Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
        _ => default_config_dir(),
    };

    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    dir
}

fn default_config_dir() -> PathBuf {
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        return PathBuf::from(local).join(CONFIG_DIR_NAME);
    }
    if let Some(home) = home_dir() {
        return home.join(format!(".{}", CONFIG_DIR_NAME));
    }
    PathBuf::from(format!(".{}", CONFIG_DIR_NAME))
}

/// Main settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// End-of-file from the line editor is turned into `exit`
    pub ctrld_exits: bool,
    /// Maximum number of history entries kept on disk
    pub history_limit: usize,
    /// Log filter directive
    pub log_level: String,
    /// Single-character prompt answering
    pub auto_answer: AutoAnswerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ctrld_exits: true,
            history_limit: 1000,
            log_level: "info".to_string(),
            auto_answer: AutoAnswerSettings::default(),
        }
    }
}

/// What to reply when a recognised confirmation prompt is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoAnswerMode {
    Off,
    Yes,
    No,
}

impl AutoAnswerMode {
    /// Reply character for this mode
    pub fn reply(self) -> Option<char> {
        match self {
            AutoAnswerMode::Off => None,
            AutoAnswerMode::Yes => Some('y'),
            AutoAnswerMode::No => Some('n'),
        }
    }
}

/// Auto-answer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAnswerSettings {
    pub mode: AutoAnswerMode,
    /// Prompt fragments that identify an answerable prompt
    pub prompts: Vec<String>,
}

impl Default for AutoAnswerSettings {
    fn default() -> Self {
        Self {
            mode: AutoAnswerMode::Off,
            prompts: vec!["Terminate batch job (Y/N)?".to_string()],
        }
    }
}

impl Settings {
    /// Load settings from `<dir>/settings.toml`, falling back to defaults
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Settings owned for the lifetime of the hook
#[derive(Debug)]
pub struct SettingsStore {
    settings: Settings,
    loaded: bool,
}

impl SettingsStore {
    /// Load the store from a configuration directory
    pub fn load(dir: &Path) -> Self {
        Self::from_settings(Settings::load(dir))
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            loaded: true,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether `shutdown` has not run yet
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Release the store. Later lookups see defaults.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if !self.loaded {
            anyhow::bail!("settings storage already shut down");
        }
        self.settings = Settings::default();
        self.loaded = false;
        info!("Settings storage shut down");
        Ok(())
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_and_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let profile = tmp.path().join("profile");

        let dir = resolve_config_dir(Some(&profile));
        assert_eq!(dir, profile);
        assert!(profile.is_dir());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(tmp.path()), Settings::default());
    }

    #[test]
    fn test_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(SETTINGS_FILE),
            "ctrld_exits = false\n[auto_answer]\nmode = \"no\"\n",
        )
        .unwrap();

        let settings = Settings::load(tmp.path());
        assert!(!settings.ctrld_exits);
        assert_eq!(settings.auto_answer.mode, AutoAnswerMode::No);
        assert_eq!(settings.auto_answer.prompts.len(), 1);
        assert_eq!(settings.history_limit, 1000);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(SETTINGS_FILE), "ctrld_exits = [").unwrap();
        assert_eq!(Settings::load(tmp.path()), Settings::default());
    }

    #[test]
    fn test_store_shutdown_once() {
        let mut store = SettingsStore::from_settings(Settings {
            ctrld_exits: false,
            ..Settings::default()
        });
        assert!(store.shutdown().is_ok());
        assert!(!store.is_loaded());
        assert!(store.settings().ctrld_exits);
        assert!(store.shutdown().is_err());
    }
}
