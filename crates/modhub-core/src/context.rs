//! Module contexts.
//!
//! A context identifies one module at one version. Declared dependencies
//! produce contexts whose version is still a requested spec:
//! - `"a": "^1.0.0"` (registry-hosted)
//! - `"b": "github://acme/b#^2.0.0"` (repository-hosted, tag-resolved)
//! - `"github://acme/b": "^2.0.0"` (repository-hosted, coordinates as the name)
//!
//! Resolution never mutates a context; [`Context::resolved`] returns a new
//! one carrying the concrete version.

use crate::error::RegistryError;
use serde::Serialize;
use std::fmt;

/// Name/spec prefix marking a repository-hosted module.
pub const REMOTE_SCHEME: &str = "github://";

/// Spec accepted as "any version".
pub const ANY_VERSION: &str = "*";

/// Source-control repository coordinates (`owner/repo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Repository {
    pub owner: String,
    pub repo: String,
}

impl Repository {
    /// Parse `owner/repo`.
    ///
    /// # Errors
    /// Returns an error if either part is missing or contains invalid characters.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let input = input.trim().trim_end_matches('/');
        let Some((owner, repo)) = input.split_once('/') else {
            return Err(RegistryError::invalid_spec(
                input,
                "expected repository coordinates as 'owner/repo'",
            ));
        };

        for part in [owner, repo] {
            if part.is_empty() {
                return Err(RegistryError::invalid_spec(input, "empty owner or repository"));
            }
            if let Some(c) = part
                .chars()
                .find(|c| !c.is_alphanumeric() && !matches!(c, '-' | '_' | '.'))
            {
                return Err(RegistryError::invalid_spec(
                    input,
                    format!("invalid character '{c}' in repository coordinates"),
                ));
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// `owner/repo`, the key used for tag-listing caches.
    #[must_use]
    pub fn coordinate(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Where a module's versions come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ContextKind {
    /// Curated database in the module store.
    Standard,
    /// Published tags of a source-control repository.
    Remote(Repository),
}

/// One module at one requested or resolved version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Context {
    name: String,
    version: String,
    #[serde(flatten)]
    kind: ContextKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl Context {
    /// A registry-hosted module context.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: ContextKind::Standard,
            location: None,
        }
    }

    /// A repository-hosted module context.
    pub fn remote(name: impl Into<String>, version: impl Into<String>, repository: Repository) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: ContextKind::Remote(repository),
            location: None,
        }
    }

    /// Build a context from a declared `name: spec` dependency pair.
    ///
    /// # Errors
    /// Returns an error if the name is empty or the repository coordinates are malformed.
    pub fn from_dependency(name: &str, spec: &str) -> Result<Self, RegistryError> {
        let name = name.trim();
        let spec = spec.trim();

        if let Some(rest) = spec.strip_prefix(REMOTE_SCHEME) {
            let (coords, range) = split_range(rest);
            let repository = Repository::parse(coords)?;
            let name = if name.is_empty() {
                repository.repo.clone()
            } else {
                name.to_string()
            };
            return Ok(Self::remote(name, range.unwrap_or(ANY_VERSION), repository));
        }

        if let Some(rest) = name.strip_prefix(REMOTE_SCHEME) {
            let (coords, range) = split_range(rest);
            let repository = Repository::parse(coords)?;
            let range = range.or_else(|| (!spec.is_empty()).then_some(spec));
            return Ok(Self::remote(
                repository.repo.clone(),
                range.unwrap_or(ANY_VERSION),
                repository,
            ));
        }

        validate_name(name)?;
        let version = if spec.is_empty() { ANY_VERSION } else { spec };
        Ok(Self::new(name, version))
    }

    /// Copy of this context pinned to a concrete version.
    ///
    /// `location` is the opaque descriptor the module database recorded for
    /// that version (for repository-hosted modules, the tag name).
    #[must_use]
    pub fn resolved(&self, version: impl Into<String>, location: Option<String>) -> Self {
        Self {
            name: self.name.clone(),
            version: version.into(),
            kind: self.kind.clone(),
            location,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    #[must_use]
    pub fn repository(&self) -> Option<&Repository> {
        match &self.kind {
            ContextKind::Remote(repository) => Some(repository),
            ContextKind::Standard => None,
        }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self.kind, ContextKind::Remote(_))
    }

    /// `name@version` identity used for caching, cycle detection and dedup.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Split `coords#range` into its parts. An empty range counts as absent.
fn split_range(input: &str) -> (&str, Option<&str>) {
    match input.split_once('#') {
        Some((coords, range)) if !range.trim().is_empty() => (coords, Some(range.trim())),
        Some((coords, _)) => (coords, None),
        None => (input, None),
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::invalid_spec(name, "empty module name"));
    }

    for c in name.chars() {
        if !c.is_alphanumeric() && !matches!(c, '-' | '_' | '.' | '/' | '@') {
            return Err(RegistryError::invalid_spec(
                name,
                format!("invalid character '{c}' in module name"),
            ));
        }
    }

    if name.starts_with('.') || name.split('/').any(|part| part.is_empty() || part == "..") {
        return Err(RegistryError::invalid_spec(name, "module name is not a safe path"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_dependency() {
        let ctx = Context::from_dependency("a", "^1.0.0").unwrap();
        assert_eq!(ctx.name(), "a");
        assert_eq!(ctx.version(), "^1.0.0");
        assert_eq!(ctx.kind(), &ContextKind::Standard);
        assert_eq!(ctx.key(), "a@^1.0.0");
    }

    #[test]
    fn test_empty_spec_means_any() {
        let ctx = Context::from_dependency("a", "").unwrap();
        assert_eq!(ctx.version(), ANY_VERSION);
    }

    #[test]
    fn test_remote_spec_value() {
        let ctx = Context::from_dependency("B", "github://acme/b#^2.0.0").unwrap();
        assert_eq!(ctx.name(), "B");
        assert_eq!(ctx.version(), "^2.0.0");
        assert_eq!(
            ctx.repository(),
            Some(&Repository {
                owner: "acme".to_string(),
                repo: "b".to_string()
            })
        );
    }

    #[test]
    fn test_remote_spec_defaults_to_any() {
        let ctx = Context::from_dependency("b", "github://acme/b").unwrap();
        assert_eq!(ctx.version(), ANY_VERSION);

        let ctx = Context::from_dependency("b", "github://acme/b#").unwrap();
        assert_eq!(ctx.version(), ANY_VERSION);
    }

    #[test]
    fn test_remote_name() {
        let ctx = Context::from_dependency("github://acme/widgets", "~1.2.0").unwrap();
        assert_eq!(ctx.name(), "widgets");
        assert_eq!(ctx.version(), "~1.2.0");
        assert!(ctx.is_remote());

        let ctx = Context::from_dependency("github://acme/widgets#1.0.0", "").unwrap();
        assert_eq!(ctx.version(), "1.0.0");
    }

    #[test]
    fn test_remote_invalid_coordinates() {
        assert!(Context::from_dependency("b", "github://acme").is_err());
        assert!(Context::from_dependency("b", "github:///b").is_err());
        assert!(Context::from_dependency("b", "github://acme/b c").is_err());
    }

    #[test]
    fn test_invalid_names() {
        assert!(Context::from_dependency("", "1.0.0").is_err());
        assert!(Context::from_dependency("bad name", "1.0.0").is_err());
        assert!(Context::from_dependency("../escape", "1.0.0").is_err());
        assert!(Context::from_dependency(".hidden", "1.0.0").is_err());
    }

    #[test]
    fn test_resolved_leaves_original_untouched() {
        let requested = Context::from_dependency("b", "github://acme/b#^2.0.0").unwrap();
        let resolved = requested.resolved("2.1.0", Some("v2.1.0".to_string()));

        assert_eq!(requested.version(), "^2.0.0");
        assert_eq!(requested.location(), None);
        assert_eq!(resolved.version(), "2.1.0");
        assert_eq!(resolved.location(), Some("v2.1.0"));
        assert_eq!(resolved.repository(), requested.repository());
        assert_eq!(resolved.to_string(), "b@2.1.0");
    }

    #[test]
    fn test_serialized_shape() {
        let standard = serde_json::to_value(Context::new("a", "1.2.0")).unwrap();
        assert_eq!(
            standard,
            serde_json::json!({"name": "a", "version": "1.2.0", "source": "standard"})
        );

        let remote = Context::from_dependency("b", "github://acme/b")
            .unwrap()
            .resolved("2.1.0", Some("v2.1.0".to_string()));
        assert_eq!(
            serde_json::to_value(remote).unwrap(),
            serde_json::json!({
                "name": "b",
                "version": "2.1.0",
                "source": "remote",
                "owner": "acme",
                "repo": "b",
                "location": "v2.1.0"
            })
        );
    }
}
