//! Storage key layouts.

use super::ObjectKind;
use crate::context::{Context, ContextKind};
use crate::database::DATABASE_FILE;
use crate::error::RegistryError;
use crate::manifest::MANIFEST_FILE;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Archive object name within a version directory.
pub const ARCHIVE_FILE: &str = "archive.tar";

/// Maps a context to the key of each of its objects.
pub trait LocationStrategy: Send + Sync + fmt::Debug {
    fn database_key(&self, ctx: &Context) -> String;
    fn manifest_key(&self, ctx: &Context) -> String;
    fn archive_key(&self, ctx: &Context) -> String;

    fn key(&self, kind: ObjectKind, ctx: &Context) -> String {
        match kind {
            ObjectKind::Database => self.database_key(ctx),
            ObjectKind::Manifest => self.manifest_key(ctx),
            ObjectKind::Archive => self.archive_key(ctx),
        }
    }
}

/// `<name>/db.json`, `<name>/@<version>/modhub.json`, `<name>/@<version>/archive.tar`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLocation;

impl LocationStrategy for DefaultLocation {
    fn database_key(&self, ctx: &Context) -> String {
        format!("{}/{DATABASE_FILE}", ctx.name())
    }

    fn manifest_key(&self, ctx: &Context) -> String {
        format!("{}/@{}/{MANIFEST_FILE}", ctx.name(), ctx.version())
    }

    fn archive_key(&self, ctx: &Context) -> String {
        format!("{}/@{}/{ARCHIVE_FILE}", ctx.name(), ctx.version())
    }
}

/// GitHub endpoints for repository-hosted modules.
///
/// Versions are addressed by their tag, which the tag listing records as the
/// version's location. A context that was never resolved falls back to its
/// version string.
#[derive(Debug, Clone)]
pub struct RemoteLocation {
    api: String,
    raw: String,
}

impl RemoteLocation {
    /// # Errors
    /// Returns an error if either base URL is invalid.
    pub fn new(api: &str, raw: &str) -> Result<Self, RegistryError> {
        Ok(Self {
            api: parse_base(api)?,
            raw: parse_base(raw)?,
        })
    }

    fn tag<'a>(ctx: &'a Context) -> &'a str {
        ctx.location().unwrap_or_else(|| ctx.version())
    }
}

impl Default for RemoteLocation {
    fn default() -> Self {
        Self {
            api: super::GITHUB_API.to_string(),
            raw: super::GITHUB_RAW.to_string(),
        }
    }
}

/// Validate a base URL, making sure it ends with `/` so keys append.
fn parse_base(input: &str) -> Result<String, RegistryError> {
    let url = Url::parse(input)
        .map_err(|e| RegistryError::Other(format!("Invalid base URL '{input}': {e}")))?;
    let mut base = url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(base)
}

impl LocationStrategy for RemoteLocation {
    fn database_key(&self, ctx: &Context) -> String {
        match ctx.repository() {
            Some(r) => format!("{}repos/{}/{}/tags", self.api, r.owner, r.repo),
            None => DefaultLocation.database_key(ctx),
        }
    }

    fn manifest_key(&self, ctx: &Context) -> String {
        match ctx.repository() {
            Some(r) => format!("{}{}/{}/{}/{MANIFEST_FILE}", self.raw, r.owner, r.repo, Self::tag(ctx)),
            None => DefaultLocation.manifest_key(ctx),
        }
    }

    fn archive_key(&self, ctx: &Context) -> String {
        match ctx.repository() {
            Some(r) => format!("{}repos/{}/{}/tarball/{}", self.api, r.owner, r.repo, Self::tag(ctx)),
            None => DefaultLocation.archive_key(ctx),
        }
    }
}

/// Picks the location strategy for a context's kind.
#[derive(Debug, Clone)]
pub struct LocationSelector {
    standard: Arc<dyn LocationStrategy>,
    remote: Arc<dyn LocationStrategy>,
}

impl LocationSelector {
    pub fn new(remote: RemoteLocation) -> Self {
        Self {
            standard: Arc::new(DefaultLocation),
            remote: Arc::new(remote),
        }
    }

    #[must_use]
    pub fn for_context(&self, ctx: &Context) -> &dyn LocationStrategy {
        match ctx.kind() {
            ContextKind::Standard => self.standard.as_ref(),
            ContextKind::Remote(_) => self.remote.as_ref(),
        }
    }
}

impl Default for LocationSelector {
    fn default() -> Self {
        Self::new(RemoteLocation::default())
    }
}
