//! core::config::schema
//!
//! Configuration file schema.
//!
//! # Location
//!
//! Searched in order of precedence:
//! 1. `--config <path>` or `$REFCHECKOUT_CONFIG`
//! 2. `$XDG_CONFIG_HOME/refcheckout/config.toml`
//! 3. `~/.refcheckout/config.toml`
//!
//! # Validation
//!
//! Config values are validated after parsing so a typo fails the run up
//! front instead of surfacing halfway through a checkout.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::IDENTITY_PLACEHOLDER;

/// What to do when the reference store could not be refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Check out from the stale store and report a warning (exit 0).
    #[default]
    Warn,
    /// Check out from the stale store but report a failure (exit 1).
    Fail,
}

impl std::str::FromStr for StalePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(StalePolicy::Warn),
            "fail" => Ok(StalePolicy::Fail),
            other => Err(ConfigError::InvalidValue(format!(
                "invalid stale policy '{other}', must be one of: warn, fail"
            ))),
        }
    }
}

impl std::fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StalePolicy::Warn => write!(f, "warn"),
            StalePolicy::Fail => write!(f, "fail"),
        }
    }
}

/// Host-level configuration file.
///
/// # Example
///
/// ```toml
/// remote_url_template = "git@git.example.com:{identity}.git"
/// store_root = "/var/cache/refcheckout"
/// network_timeout_secs = 120
/// lock_timeout_secs = 900
/// fetch_retries = 3
/// stale_policy = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Remote URL template; `{identity}` is replaced by the repository identity
    pub remote_url_template: Option<String>,

    /// Directory under which default reference stores are created
    pub store_root: Option<PathBuf>,

    /// The git executable used for network operations
    pub git_binary: Option<PathBuf>,

    /// Upper bound for a whole store refresh, including retries
    pub network_timeout_secs: Option<u64>,

    /// Upper bound for waiting on the store lock
    pub lock_timeout_secs: Option<u64>,

    /// Extra attempts after a transient transport failure
    pub fetch_retries: Option<u32>,

    /// Backoff between attempts, multiplied by the attempt number
    pub retry_backoff_ms: Option<u64>,

    /// Stale store handling
    pub stale_policy: Option<StalePolicy>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(template) = &self.remote_url_template {
            if !template.contains(IDENTITY_PLACEHOLDER) {
                return Err(ConfigError::InvalidValue(format!(
                    "remote_url_template '{template}' must contain {IDENTITY_PLACEHOLDER}"
                )));
            }
        }

        if self.network_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "network_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.lock_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "lock_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(retries) = self.fetch_retries {
            if retries > 10 {
                return Err(ConfigError::InvalidValue(format!(
                    "fetch_retries {retries} is too large (max 10)"
                )));
            }
        }

        if let Some(git) = &self.git_binary {
            if git.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "git_binary cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}
