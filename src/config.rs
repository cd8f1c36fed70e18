//! Configuration for the notifier daemon.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TW_` and use double
//! underscores to separate nested levels:
//! - `TW_WATCHER__MAX_WATCHES=65536` sets `watcher.max_watches`
//! - `TW_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch engine settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Cap on live kernel registrations. Zero means use the platform
    /// quota (`/proc/sys/fs/inotify/max_user_watches` on Linux).
    #[serde(default)]
    pub max_watches: usize,

    /// Ignore rules appended to every root's list. Each rule matches as
    /// a path prefix or suffix.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, or trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `treewatch::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_watches: 0,
            ignore: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration: defaults, then the settings file, then `TW_*`
    /// environment overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(Self::settings_path())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TW_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// The nearest `.treewatch/settings.toml`, walking up from the
    /// current directory. Falls back to the current directory's location
    /// when no ancestor carries one, so `init` and `load` agree on where
    /// the file belongs.
    fn settings_path() -> PathBuf {
        let fallback = PathBuf::from(".treewatch/settings.toml");
        let Ok(cwd) = std::env::current_dir() else {
            return fallback;
        };
        cwd.ancestors()
            .map(|dir| dir.join(".treewatch/settings.toml"))
            .find(|candidate| candidate.is_file())
            .unwrap_or(fallback)
    }

    /// Sanity-check the settings file before the daemon starts, so a
    /// typo in `[watcher]` or `[logging]` surfaces as a warning instead
    /// of silently running on defaults.
    pub fn check_init() -> Result<(), String> {
        let path = Self::settings_path();
        if !path.is_file() {
            return Err(format!(
                "no settings file at {}; 'treewatch init' writes one with the [watcher] and [logging] sections",
                path.display()
            ));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str::<Settings>(&content).map_err(|e| {
            format!(
                "{} does not parse as treewatch settings ({e}); expected watcher.max_watches, \
                 watcher.ignore, and logging.default. 'treewatch init --force' regenerates it",
                path.display()
            )
        })?;

        Ok(())
    }

    /// Write an annotated default settings file into `./.treewatch/`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let path = PathBuf::from(".treewatch/settings.toml");
        if path.exists() && !force {
            return Err(format!(
                "{} already exists; pass --force to overwrite",
                path.display()
            )
            .into());
        }

        std::fs::create_dir_all(".treewatch")?;
        std::fs::write(&path, Self::default_file_contents()?)?;
        Ok(path)
    }

    fn default_file_contents() -> Result<String, toml::ser::Error> {
        let mut text = String::from(
            "# treewatch settings\n\
             # watcher.max_watches: 0 means the platform quota\n\
             # watcher.ignore: rules matched as path prefix or suffix\n\
             # logging.default: error | warn | info | debug | trace\n\n",
        );
        text.push_str(&toml::to_string_pretty(&Settings::default())?);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watcher.max_watches, 0);
        assert!(settings.watcher.ignore.is_empty());
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn toml_round_trip() {
        let mut settings = Settings::default();
        settings.watcher.max_watches = 4096;
        settings.watcher.ignore = vec!["target".to_string()];

        let text = toml::to_string_pretty(&settings).unwrap();
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back.watcher.max_watches, 4096);
        assert_eq!(back.watcher.ignore, vec!["target".to_string()]);
    }

    #[test]
    fn generated_settings_file_parses_back() {
        let text = Settings::default_file_contents().unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.watcher.max_watches, 0);
        assert!(parsed.watcher.ignore.is_empty());
        assert_eq!(parsed.logging.default, "warn");
    }
}
