//! core::config::request
//!
//! Resolution of invocation options into a [`CheckoutRequest`].
//!
//! Every option has one row in [`OPTIONS`]: its canonical flag name, the
//! flag aliases older wrappers used, the CI input variables that may carry
//! it, and the ambient CI variable supplying its default. Lookup order per
//! option is: CLI flag, CI inputs (in table order), ambient context.
//! Empty values count as unset, since CI runners export every declared
//! input even when the user left it blank.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::{Config, ConfigError, StalePolicy};
use crate::core::paths::StorePaths;
use crate::core::types::{RepositoryIdentity, RevisionSpec};

/// One row of the option resolution table.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// Canonical long flag name
    pub name: &'static str,
    /// Accepted flag aliases
    pub aliases: &'static [&'static str],
    /// CI input variables, in precedence order
    pub inputs: &'static [&'static str],
    /// Ambient CI variable providing the default
    pub ambient: Option<&'static str>,
}

pub const REPOSITORY: OptionSpec = OptionSpec {
    name: "repository",
    aliases: &["project"],
    inputs: &["INPUT_REPOSITORY", "INPUT_PROJECT"],
    ambient: Some("GITHUB_REPOSITORY"),
};

pub const REF_DIR: OptionSpec = OptionSpec {
    name: "ref-dir",
    aliases: &["common-path"],
    inputs: &["INPUT_REF-DIR", "INPUT_COMMON-PATH"],
    ambient: None,
};

pub const TARGET_DIR: OptionSpec = OptionSpec {
    name: "target-dir",
    aliases: &["path"],
    inputs: &["INPUT_TARGET-DIR", "INPUT_PATH"],
    ambient: Some("GITHUB_WORKSPACE"),
};

pub const TARGET_REF: OptionSpec = OptionSpec {
    name: "target-ref",
    aliases: &["ref"],
    inputs: &["INPUT_TARGET-REF", "INPUT_REF"],
    ambient: None,
};

pub const CLEAN: OptionSpec = OptionSpec {
    name: "clean",
    aliases: &[],
    inputs: &["INPUT_CLEAN"],
    ambient: None,
};

/// The option resolution table.
pub const OPTIONS: &[OptionSpec] = &[REPOSITORY, REF_DIR, TARGET_DIR, TARGET_REF, CLEAN];

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Input(&'static str),
    Ambient(&'static str),
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Flag => write!(f, "flag"),
            ValueSource::Input(var) | ValueSource::Ambient(var) => write!(f, "${var}"),
        }
    }
}

/// Ambient CI context, captured once at startup and passed explicitly.
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    /// Directory relative paths are resolved against
    pub cwd: PathBuf,
    vars: BTreeMap<String, String>,
}

impl AmbientContext {
    /// An empty context rooted at `cwd`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            vars: BTreeMap::new(),
        }
    }

    /// Capture every variable named in [`OPTIONS`] from the process environment.
    pub fn from_env() -> std::io::Result<Self> {
        let mut ctx = Self::new(std::env::current_dir()?);
        for spec in OPTIONS {
            for var in spec.inputs.iter().chain(spec.ambient.iter()) {
                if let Ok(value) = std::env::var(var) {
                    ctx.vars.insert((*var).to_string(), value);
                }
            }
        }
        Ok(ctx)
    }

    /// Add a variable (builder style).
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    /// Get a non-empty variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Resolve one option by the table's precedence.
    pub fn lookup(&self, spec: &OptionSpec, flag: Option<&str>) -> Option<(String, ValueSource)> {
        if let Some(value) = flag.map(str::trim).filter(|v| !v.is_empty()) {
            return Some((value.to_string(), ValueSource::Flag));
        }
        for var in spec.inputs {
            if let Some(value) = self.var(var) {
                return Some((value.to_string(), ValueSource::Input(var)));
            }
        }
        if let Some(var) = spec.ambient {
            if let Some(value) = self.var(var) {
                return Some((value.to_string(), ValueSource::Ambient(var)));
            }
        }
        None
    }

    /// Absolute, lexically normalized form of `path`.
    fn absolutize(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        };
        let mut normal = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normal.pop();
                }
                other => normal.push(other),
            }
        }
        normal
    }
}

/// Raw values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub repository: Option<String>,
    pub ref_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub target_ref: Option<String>,
    /// `Some(true)` when `--clean` was passed
    pub clean: Option<bool>,
    pub network_timeout: Option<Duration>,
    pub lock_timeout: Option<Duration>,
    pub stale_policy: Option<StalePolicy>,
}

/// Operational knobs shared by all components.
#[derive(Debug, Clone)]
pub struct Settings {
    pub remote_url_template: String,
    pub git_binary: PathBuf,
    pub network_timeout: Duration,
    pub lock_timeout: Duration,
    pub fetch_retries: u32,
    pub retry_backoff: Duration,
    pub stale_policy: StalePolicy,
}

impl Settings {
    /// Settings from a loaded config, before CLI overrides.
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote_url_template: config.remote_url_template().to_string(),
            git_binary: config.git_binary().to_path_buf(),
            network_timeout: config.network_timeout(),
            lock_timeout: config.lock_timeout(),
            fetch_retries: config.fetch_retries(),
            retry_backoff: config.retry_backoff(),
            stale_policy: config.stale_policy(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A fully resolved checkout request, the orchestrator's only input.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub identity: RepositoryIdentity,
    pub remote_url: String,
    pub store: StorePaths,
    pub target_dir: PathBuf,
    pub revision: RevisionSpec,
    pub clean: bool,
    pub settings: Settings,
}

impl CheckoutRequest {
    /// Combine CLI values, ambient context, and config into a request.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingValue`] if no repository identity is available
    /// - [`ConfigError::InvalidValue`] for malformed identities or booleans
    /// - [`ConfigError::NestedStore`] if the store and the target directory
    ///   contain one another
    pub fn resolve(
        invocation: &Invocation,
        ambient: &AmbientContext,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let (raw_identity, _) = ambient
            .lookup(&REPOSITORY, invocation.repository.as_deref())
            .ok_or_else(|| ConfigError::MissingValue {
                name: REPOSITORY.name,
                hint: describe_sources(&REPOSITORY),
            })?;
        let identity = RepositoryIdentity::new(raw_identity)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let ref_dir_flag = invocation.ref_dir.as_ref().map(|p| p.to_string_lossy());
        let store_dir = match ambient.lookup(&REF_DIR, ref_dir_flag.as_deref()) {
            Some((dir, _)) => ambient.absolutize(Path::new(&dir)),
            None => ambient
                .absolutize(&config.store_root())
                .join(identity.default_store_name()),
        };

        let target_flag = invocation.target_dir.as_ref().map(|p| p.to_string_lossy());
        let target_dir = match ambient.lookup(&TARGET_DIR, target_flag.as_deref()) {
            Some((dir, _)) => ambient.absolutize(Path::new(&dir)),
            None => ambient.absolutize(Path::new(".")),
        };

        let revision = ambient
            .lookup(&TARGET_REF, invocation.target_ref.as_deref())
            .map(|(spec, _)| RevisionSpec::parse(&spec))
            .unwrap_or(RevisionSpec::Default);

        let clean_flag = invocation.clean.filter(|c| *c).map(|_| "true");
        let clean = match ambient.lookup(&CLEAN, clean_flag) {
            Some((value, source)) => parse_bool(&value).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "clean must be true or false, got '{value}' from {source}"
                ))
            })?,
            None => false,
        };

        // Cleaning or recreating the target must never reach the store.
        if store_dir.starts_with(&target_dir) || target_dir.starts_with(&store_dir) {
            return Err(ConfigError::NestedStore {
                store: store_dir,
                target: target_dir,
            });
        }

        let mut settings = Settings::from_config(config);
        if let Some(timeout) = invocation.network_timeout {
            settings.network_timeout = timeout;
        }
        if let Some(timeout) = invocation.lock_timeout {
            settings.lock_timeout = timeout;
        }
        if let Some(policy) = invocation.stale_policy {
            settings.stale_policy = policy;
        }

        Ok(Self {
            remote_url: identity.remote_url(&settings.remote_url_template),
            identity,
            store: StorePaths::new(store_dir),
            target_dir,
            revision,
            clean,
            settings,
        })
    }
}

fn describe_sources(spec: &OptionSpec) -> String {
    spec.inputs
        .iter()
        .chain(spec.ambient.iter())
        .copied()
        .collect::<Vec<_>>()
        .join(" or ")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
