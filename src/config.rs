//! Configuration management for patchwright
//!
//! Stores settings in ~/.config/patchwright/config.json. An explicit
//! `--config` file (TOML or JSON) layers over it key by key, and
//! environment variables override both.

use crate::protocol::PatchLimits;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_MAX_ITERATIONS: &str = "PATCHWRIGHT_MAX_ITERATIONS";
const ENV_ANALYZER_TIMEOUT: &str = "PATCHWRIGHT_ANALYZER_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repair loop iteration cap
    pub max_iterations: usize,
    /// Largest span a single structured edit may touch
    pub max_edit_lines: usize,
    /// Largest total span across one envelope
    pub max_total_lines: usize,
    /// Full rewrites shorter than this are treated as corrupt
    pub min_rewrite_chars: usize,
    /// Command (program then args) that reads a file on stdin and prints an analysis
    pub analyzer_command: Option<Vec<String>>,
    pub analyzer_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let limits = PatchLimits::default();
        Self {
            max_iterations: 5,
            max_edit_lines: limits.max_edit_lines,
            max_total_lines: limits.max_total_lines,
            min_rewrite_chars: limits.min_rewrite_chars,
            analyzer_command: None,
            analyzer_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("patchwright"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Defaults, then the user config file, then `explicit`, then the environment
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_layers(Self::config_path().as_deref(), explicit, |key| {
            std::env::var(key).ok()
        })
    }

    /// Each layer only overrides the keys it sets
    fn load_layers(
        user: Option<&Path>,
        explicit: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = user.map(Self::load_user_file).unwrap_or_default();
        if let Some(path) = explicit {
            config = config.merge_file(path)?;
        }
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Read the user config, falling back to defaults if it is missing or corrupt
    fn load_user_file(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Parse an explicit config file over the defaults
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::default().merge_file(path)
    }

    /// Override the settings `path` names, keeping the rest.
    ///
    /// `.toml` by extension, JSON otherwise.
    pub fn merge_file(self, path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let overrides: serde_json::Value = if is_toml {
            let table: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?;
            serde_json::to_value(table)?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
        };
        let serde_json::Value::Object(overrides) = overrides else {
            bail!("{} must contain a table of settings", path.display());
        };

        let mut merged = serde_json::to_value(&self).context("Failed to serialize config")?;
        if let Some(base) = merged.as_object_mut() {
            base.extend(overrides);
        }
        serde_json::from_value(merged)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got {:?}", ENV_MAX_ITERATIONS, raw))?;
        }
        if let Some(raw) = lookup(ENV_ANALYZER_TIMEOUT) {
            self.analyzer_timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", ENV_ANALYZER_TIMEOUT, raw))?;
        }
        if self.max_iterations == 0 {
            bail!("max_iterations must be at least 1");
        }
        Ok(())
    }

    pub fn limits(&self) -> PatchLimits {
        PatchLimits {
            max_edit_lines: self.max_edit_lines,
            max_total_lines: self.max_total_lines,
            min_rewrite_chars: self.min_rewrite_chars,
        }
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }

    /// Save config to the user config file
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir().context("Could not determine config directory")?;
        self.save_to(&dir.join("config.json"))
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_config_atomic(path, &content).context("Failed to write config")
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/patchwright/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
