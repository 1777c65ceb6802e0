//! Configuration file parser for ~/.config/gleaner/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file too large: {0}")]
    TooLarge(String),
}

/// Application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the database and staging directory live. Defaults to the
    /// config directory itself.
    pub data_dir: Option<PathBuf>,

    /// Age in days past which abandoned articles are swept.
    pub retention_days: u64,

    /// Whether the sweep spares tagged articles regardless of age.
    pub keep_tagged_on_sweep: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            retention_days: 90,
            keep_tagged_on_sweep: true,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB) — a corrupted or hostile file should
    /// not be slurped into memory.
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.retention_days, 90);
        assert!(config.keep_tagged_on_sweep);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "retention_days = 30\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retention_days, 30);
        assert!(config.keep_tagged_on_sweep, "unset keys keep defaults");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "retention_days = [oops").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "  \n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retention_days, 90);
    }
}
