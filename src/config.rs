//! Engine configuration, loaded from TOML.
//!
//! The config is a plain value passed into calls; nothing here is global.
//!
//! ```toml
//! mode = "aes256-gcm-siv"   # or "aes256-cbc"
//! iterations = 600000
//! workers = 4               # 0 = one per CPU
//! output_dir = "/srv/vault" # optional
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::batch::BatchOptions;
use crate::types::{DEFAULT_ITERATIONS, EncryptOptions, MAX_ITERATIONS, MIN_ITERATIONS, Mode};

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "seft.toml";

/// Upper bound on configured batch workers.
pub const MAX_WORKERS: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mode: Mode,
    pub iterations: u32,
    pub workers: usize,
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            iterations: DEFAULT_ITERATIONS,
            workers: 0,
            output_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Discover and load config from standard locations.
    ///
    /// Search order:
    /// 1. `./seft.toml`
    /// 2. `seft.toml` in the user config dir (`~/.config/seft/` on Linux)
    ///
    /// Returns the defaults if no file is found or the file is invalid.
    pub fn discover() -> Self {
        if let Some(path) = find_config_file() {
            debug!(path = %path.display(), "loading config");
            match Self::load(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load config, using defaults"
                    );
                }
            }
        } else {
            debug!("no config file found, using defaults");
        }
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(ConfigError::Invalid(format!(
                "iterations must be between {MIN_ITERATIONS} and {MAX_ITERATIONS}, got {}",
                self.iterations
            )));
        }
        if self.workers > MAX_WORKERS {
            return Err(ConfigError::Invalid(format!(
                "workers must be at most {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        Ok(())
    }

    pub fn encrypt_options(&self) -> EncryptOptions {
        EncryptOptions::default()
            .with_mode(self.mode)
            .with_iterations(self.iterations)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            mode: self.mode,
            iterations: self.iterations,
            workers: self.workers,
            ..Default::default()
        }
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    config_dir()
        .map(|dir| dir.join(CONFIG_FILENAME))
        .filter(|p| p.exists())
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "seft").map(|d| d.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(EngineConfig::parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn parses_all_fields() {
        let cfg = EngineConfig::parse(
            r#"
            mode = "aes256-cbc"
            iterations = 200000
            workers = 3
            output_dir = "/tmp/out"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, Mode::Aes256Cbc);
        assert_eq!(cfg.iterations, 200_000);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/tmp/out")));

        let opts = cfg.encrypt_options();
        assert_eq!(opts.mode, Mode::Aes256Cbc);
        assert_eq!(opts.iterations, 200_000);
        assert_eq!(cfg.batch_options().workers, 3);
    }

    #[test]
    fn rejects_weak_iterations() {
        let err = EngineConfig::parse("iterations = 1000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys_and_modes() {
        assert!(matches!(
            EngineConfig::parse("colour = \"dark\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::parse("mode = \"rot13\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/seft.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
