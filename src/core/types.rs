//! core::types
//!
//! Strong types for checkout domain concepts.
//!
//! # Types
//!
//! - [`RepositoryIdentity`] - Which remote repository a run is about
//! - [`RevisionSpec`] - What the caller asked to check out
//! - [`Oid`] - Git object identifier (SHA)
//! - [`RefName`] - Validated Git reference name
//! - [`UtcTimestamp`] - RFC3339 timestamp
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so the engine never has to re-check them.
//!
//! # Examples
//!
//! ```
//! use refcheckout::core::types::{Oid, RepositoryIdentity, RevisionSpec};
//!
//! let identity = RepositoryIdentity::new("acme/widget").unwrap();
//! assert_eq!(
//!     identity.remote_url("https://github.com/{identity}.git"),
//!     "https://github.com/acme/widget.git"
//! );
//!
//! assert!(RevisionSpec::parse("").is_default());
//! assert!(Oid::new("not-a-sha").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid repository identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),
}

/// Placeholder substituted by [`RepositoryIdentity::remote_url`].
pub const IDENTITY_PLACEHOLDER: &str = "{identity}";

/// Opaque identifier of the remote repository, immutable for a run.
///
/// Usually an `owner/name` pair as exposed by CI platforms, but a full
/// remote URL or an absolute path is accepted as well.
///
/// # Example
///
/// ```
/// use refcheckout::core::types::RepositoryIdentity;
///
/// let id = RepositoryIdentity::new("acme/widget").unwrap();
/// assert_eq!(id.as_str(), "acme/widget");
///
/// assert!(RepositoryIdentity::new("").is_err());
/// assert!(RepositoryIdentity::new("acme/../etc").is_err());
/// assert!(RepositoryIdentity::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryIdentity(String);

impl RepositoryIdentity {
    /// Create a new validated identity.
    ///
    /// Surrounding whitespace and a trailing `/` are trimmed.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidIdentity` for empty identities, identities
    /// containing whitespace or control characters, or `..` path components.
    pub fn new(identity: impl Into<String>) -> Result<Self, TypeError> {
        let identity = identity.into();
        let identity = identity.trim().trim_end_matches('/').to_string();
        Self::validate(&identity)?;
        Ok(Self(identity))
    }

    fn validate(identity: &str) -> Result<(), TypeError> {
        if identity.is_empty() {
            return Err(TypeError::InvalidIdentity(
                "identity cannot be empty".into(),
            ));
        }
        if identity
            .chars()
            .any(|c| c.is_whitespace() || c.is_ascii_control())
        {
            return Err(TypeError::InvalidIdentity(format!(
                "'{identity}' contains whitespace or control characters"
            )));
        }
        if !identity.contains("://")
            && identity.split(['/', '\\']).any(|component| component == "..")
        {
            return Err(TypeError::InvalidIdentity(format!(
                "'{identity}' contains a '..' component"
            )));
        }
        Ok(())
    }

    /// Whether the identity already names a location (URL, scp-style
    /// address, or absolute path) rather than an `owner/name` slug.
    pub fn is_location(&self) -> bool {
        self.0.contains("://")
            || (self.0.contains('@') && self.0.contains(':'))
            || std::path::Path::new(&self.0).is_absolute()
    }

    /// Compute the remote URL for this identity.
    ///
    /// Location-style identities are returned verbatim. Otherwise every
    /// `{identity}` in `template` is replaced with the identity.
    pub fn remote_url(&self, template: &str) -> String {
        if self.is_location() {
            self.0.clone()
        } else {
            template.replace(IDENTITY_PLACEHOLDER, &self.0)
        }
    }

    /// The default reference store directory name: `<identity>.git`.
    ///
    /// For location-style identities only the last path component is used,
    /// so `https://host/acme/widget.git` maps to `widget.git`.
    pub fn default_store_name(&self) -> String {
        if self.is_location() {
            let last = self
                .0
                .rsplit(['/', ':', '\\'])
                .find(|s| !s.is_empty())
                .unwrap_or("repository");
            let stem = last.strip_suffix(".git").unwrap_or(last);
            format!("{stem}.git")
        } else {
            format!("{}.git", self.0)
        }
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepositoryIdentity {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RepositoryIdentity> for String {
    fn from(id: RepositoryIdentity) -> Self {
        id.0
    }
}

impl AsRef<str> for RepositoryIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-supplied revision specifier.
///
/// Empty input selects the store's default branch. Anything else is
/// matched by the resolver against refs first, then commit prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RevisionSpec {
    /// The remote's default branch.
    Default,
    /// A branch, tag, full ref name, or commit id (prefix).
    Named(String),
}

impl RevisionSpec {
    /// Shortest commit prefix accepted, matching git's own minimum.
    pub const MIN_PREFIX_LEN: usize = 4;

    /// Parse a specifier; surrounding whitespace is ignored.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() {
            RevisionSpec::Default
        } else {
            RevisionSpec::Named(spec.to_string())
        }
    }

    /// Whether this selects the default branch.
    pub fn is_default(&self) -> bool {
        matches!(self, RevisionSpec::Default)
    }

    /// Whether the specifier could be an abbreviated or full commit id.
    ///
    /// ```
    /// use refcheckout::core::types::RevisionSpec;
    ///
    /// assert!(RevisionSpec::parse("abc1234").is_hex_prefix());
    /// assert!(!RevisionSpec::parse("abc").is_hex_prefix());
    /// assert!(!RevisionSpec::parse("main").is_hex_prefix());
    /// ```
    pub fn is_hex_prefix(&self) -> bool {
        match self {
            RevisionSpec::Default => false,
            RevisionSpec::Named(s) => {
                (Self::MIN_PREFIX_LEN..=64).contains(&s.len())
                    && s.chars().all(|c| c.is_ascii_hexdigit())
            }
        }
    }

    /// The raw specifier text (empty for the default branch).
    pub fn as_str(&self) -> &str {
        match self {
            RevisionSpec::Default => "",
            RevisionSpec::Named(s) => s,
        }
    }
}

impl std::fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionSpec::Default => write!(f, "<default branch>"),
            RevisionSpec::Named(s) => write!(f, "{s}"),
        }
    }
}

/// A Git object identifier (SHA-1 or SHA-256).
///
/// OIDs are normalized to lowercase for consistency.
///
/// # Example
///
/// ```
/// use refcheckout::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id, normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a valid hex OID.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        Self::validate(&oid)?;
        Ok(Self(oid))
    }

    /// Check if this is the zero/null OID.
    pub fn is_zero(&self) -> bool {
        self.0.chars().all(|c| c == '0')
    }

    /// Get an abbreviated form of the OID.
    ///
    /// Returns the first `len` characters, or the whole OID if shorter.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    fn validate(oid: &str) -> Result<(), TypeError> {
        // SHA-1 is 40 hex chars, SHA-256 is 64
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(())
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated Git reference name.
///
/// # Example
///
/// ```
/// use refcheckout::core::types::RefName;
///
/// assert_eq!(RefName::for_branch("main").unwrap().as_str(), "refs/heads/main");
/// assert_eq!(RefName::for_tag("v1.0").unwrap().as_str(), "refs/tags/v1.0");
/// assert!(RefName::new("refs/heads/bad..name").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// `refs/heads/<branch>`
    pub fn for_branch(branch: &str) -> Result<Self, TypeError> {
        Self::new(format!("refs/heads/{branch}"))
    }

    /// `refs/tags/<tag>`
    pub fn for_tag(tag: &str) -> Result<Self, TypeError> {
        Self::new(format!("refs/tags/{tag}"))
    }

    /// Strip a prefix from the ref name.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }

    /// Short name for display: `refs/heads/main` becomes `main`.
    pub fn shorthand(&self) -> &str {
        ["refs/heads/", "refs/tags/", "refs/remotes/"]
            .iter()
            .find_map(|p| self.0.strip_prefix(p))
            .unwrap_or(&self.0)
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidRefName("ref name cannot be empty".into()));
        }
        if name != "HEAD" && !name.starts_with("refs/") {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' must start with 'refs/'"
            )));
        }
        if name.ends_with('/') || name.ends_with(".lock") || name.ends_with('.') {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' has an invalid ending"
            )));
        }
        if name.contains("..") || name.contains("//") || name.contains("@{") {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' contains an invalid sequence"
            )));
        }

        const INVALID_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];
        if name
            .chars()
            .any(|c| INVALID_CHARS.contains(&c) || c.is_ascii_control())
        {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' contains an invalid character"
            )));
        }

        if name
            .split('/')
            .any(|component| component.starts_with('.') || component.ends_with(".lock"))
        {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' has an invalid path component"
            )));
        }

        Ok(())
    }

    /// Get the ref name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A UTC timestamp, serialized as RFC3339.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Create a timestamp from a chrono DateTime.
    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(dt)
    }

    /// Get the underlying datetime.
    pub fn as_datetime(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
