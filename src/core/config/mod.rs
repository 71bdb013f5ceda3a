//! core::config
//!
//! Configuration schema, loading, and invocation resolution.
//!
//! # Overview
//!
//! A run is configured from four layers (later overrides earlier):
//! 1. Built-in defaults
//! 2. The host config file ([`FileConfig`])
//! 3. CI inputs and ambient context ([`AmbientContext`])
//! 4. CLI flags ([`Invocation`])
//!
//! Layers 3 and 4 are combined through a single option table
//! ([`request::OPTIONS`]) into a [`CheckoutRequest`].
//!
//! # Config File Locations
//!
//! Searched in order:
//! 1. The explicit `--config` path, else `$REFCHECKOUT_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/refcheckout/config.toml`
//! 3. `~/.refcheckout/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use refcheckout::core::config::Config;
//!
//! let config = Config::load(None).unwrap();
//! println!("network timeout: {:?}", config.network_timeout());
//! println!("stale policy: {}", config.stale_policy());
//! ```

pub mod request;
pub mod schema;

pub use request::{AmbientContext, CheckoutRequest, Invocation, Settings, ValueSource};
pub use schema::{FileConfig, StalePolicy};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Remote URL template used when none is configured.
pub const DEFAULT_REMOTE_URL_TEMPLATE: &str = "https://github.com/{identity}.git";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "REFCHECKOUT_CONFIG";

/// Directory under the cache root holding default stores.
pub const STORE_ROOT_DIR: &str = "refcheckout";

const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;
const DEFAULT_FETCH_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("config file '{path}' does not exist")]
    NotFound { path: PathBuf },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("missing required option '{name}' (pass --{name} or set {hint})")]
    MissingValue { name: &'static str, hint: String },

    /// The store would sit inside the workspace, or the reverse.
    #[error(
        "reference store {} overlaps target directory {} (pass --ref-dir outside the target)",
        store.display(),
        target.display()
    )]
    NestedStore { store: PathBuf, target: PathBuf },
}

/// Loaded configuration with defaults applied through accessors.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed file contents (all `None` when no file was found)
    pub file: FileConfig,
    /// Path the file was loaded from, if any
    loaded_from: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the explicit path or the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing, or if a
    /// file exists but cannot be parsed or fails validation. A missing
    /// file at a default location is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        // 1. $REFCHECKOUT_CONFIG
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Self::load_from(Path::new(&path));
            }
        }

        // 2. $XDG_CONFIG_HOME/refcheckout/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("refcheckout/config.toml");
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        // 3. ~/.refcheckout/config.toml
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".refcheckout/config.toml");
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let file: FileConfig = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        file.validate()?;

        Ok(Self {
            file,
            loaded_from: Some(path.to_path_buf()),
        })
    }

    /// Build a config from already-parsed values.
    pub fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        file.validate()?;
        Ok(Self {
            file,
            loaded_from: None,
        })
    }

    // =========================================================================
    // Accessors with defaults
    // =========================================================================

    /// Remote URL template. Defaults to GitHub over HTTPS.
    pub fn remote_url_template(&self) -> &str {
        self.file
            .remote_url_template
            .as_deref()
            .unwrap_or(DEFAULT_REMOTE_URL_TEMPLATE)
    }

    /// Root for default store locations. Defaults to `refcheckout` under
    /// the user cache directory, or under the temp directory without one.
    pub fn store_root(&self) -> PathBuf {
        match &self.file.store_root {
            Some(root) => root.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(STORE_ROOT_DIR),
        }
    }

    /// The git executable. Defaults to `git` on `PATH`.
    pub fn git_binary(&self) -> &Path {
        self.file
            .git_binary
            .as_deref()
            .unwrap_or_else(|| Path::new("git"))
    }

    /// Bound for a store refresh. Defaults to 5 minutes.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(
            self.file
                .network_timeout_secs
                .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
        )
    }

    /// Bound for waiting on the store lock. Defaults to 10 minutes.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(
            self.file
                .lock_timeout_secs
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
        )
    }

    /// Retries after a transient transport failure. Defaults to 2.
    pub fn fetch_retries(&self) -> u32 {
        self.file.fetch_retries.unwrap_or(DEFAULT_FETCH_RETRIES)
    }

    /// Base backoff between attempts. Defaults to 1 second.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.file.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS))
    }

    /// Stale store policy. Defaults to [`StalePolicy::Warn`].
    pub fn stale_policy(&self) -> StalePolicy {
        self.file.stale_policy.unwrap_or_default()
    }

    /// Get the path the config was loaded from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.remote_url_template(), DEFAULT_REMOTE_URL_TEMPLATE);
        assert!(config.store_root().ends_with(STORE_ROOT_DIR));
        assert!(config.store_root().is_absolute());
        assert_eq!(config.git_binary(), Path::new("git"));
        assert_eq!(config.network_timeout(), Duration::from_secs(300));
        assert_eq!(config.lock_timeout(), Duration::from_secs(600));
        assert_eq!(config.fetch_retries(), 2);
        assert_eq!(config.stale_policy(), StalePolicy::Warn);
        assert!(config.loaded_from().is_none());
    }

    #[test]
    fn load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
            store_root = "/srv/mirrors"
            network_timeout_secs = 30
            stale_policy = "fail"
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.store_root(), PathBuf::from("/srv/mirrors"));
        assert_eq!(config.network_timeout(), Duration::from_secs(30));
        assert_eq!(config.stale_policy(), StalePolicy::Fail);
        assert_eq!(config.loaded_from(), Some(path.as_path()));
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let result = Config::load(Some(&temp.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn parse_error_names_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "store_root = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn invalid_values_rejected_on_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "remote_url_template = \"https://example.com/x.git\"").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn from_file_config_validates() {
        let file = FileConfig {
            fetch_retries: Some(99),
            ..Default::default()
        };
        assert!(Config::from_file_config(file).is_err());
    }
}
