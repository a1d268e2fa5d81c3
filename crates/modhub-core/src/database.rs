//! Per-module version databases.
//!
//! A curated database is stored as one JSON object per module name. The
//! repository-hosted variant is derived from a tag listing instead and is
//! never written back.

use crate::error::RegistryError;
use crate::strategy::clean_version;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::warn;

/// File name of a module database in the store.
pub const DATABASE_FILE: &str = "db.json";

/// Where one known version can be fetched from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Opaque location descriptor; the tag name for repository-hosted modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Known versions of one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionEntry>,
}

/// One entry of a repository tag listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub name: String,
    #[serde(default)]
    pub tarball_url: Option<String>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: BTreeMap::new(),
        }
    }

    /// Decode a stored database. `module` names the object in errors.
    ///
    /// # Errors
    /// Returns `InvalidData` if the bytes are not a database document.
    pub fn from_slice(module: &str, bytes: &[u8]) -> Result<Self, RegistryError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RegistryError::invalid_data(format!("database of {module}"), e))
    }

    /// Build a database from a repository's tag listing.
    ///
    /// Tags are keyed by their cleaned semver form; the original tag name is
    /// kept as the location. Tags that are not semver-shaped are excluded
    /// with a warning, as are later tags cleaning to an already listed version.
    #[must_use]
    pub fn from_tags(name: &str, tags: &[TagEntry]) -> Self {
        let mut db = Self::new(name);

        for tag in tags {
            match clean_version(&tag.name) {
                Some(version) => match db.versions.entry(version.to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(VersionEntry {
                            location: Some(tag.name.clone()),
                        });
                    }
                    Entry::Occupied(first) => {
                        warn!(
                            module = %name,
                            tag = %tag.name,
                            kept = first.get().location.as_deref().unwrap_or_default(),
                            "Ignoring tag that duplicates an earlier version"
                        );
                    }
                },
                None => {
                    warn!(module = %name, tag = %tag.name, "Ignoring tag that is not a semantic version");
                }
            }
        }

        db
    }

    /// Decode a tag listing body and build a database from it.
    ///
    /// # Errors
    /// Returns `InvalidData` if the body is not a JSON array of tags.
    pub fn from_tag_listing(name: &str, bytes: &[u8]) -> Result<Self, RegistryError> {
        let tags: Vec<TagEntry> = serde_json::from_slice(bytes)
            .map_err(|e| RegistryError::invalid_data(format!("tag listing of {name}"), e))?;
        Ok(Self::from_tags(name, &tags))
    }

    /// Encode for storage.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, RegistryError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// All known version identifiers, in storage order.
    #[must_use]
    pub fn versions(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn contains(&self, version: &str) -> bool {
        self.versions.contains_key(version)
    }

    /// Location descriptor recorded for a version.
    #[must_use]
    pub fn location(&self, version: &str) -> Option<&str> {
        self.versions.get(version)?.location.as_deref()
    }

    pub fn add_version(&mut self, version: impl Into<String>, location: Option<String>) {
        self.versions.insert(version.into(), VersionEntry { location });
    }

    /// Returns `true` if the version was known.
    pub fn remove_version(&mut self, version: &str) -> bool {
        self.versions.remove(version).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
