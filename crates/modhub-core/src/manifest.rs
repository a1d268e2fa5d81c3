//! Per-version module manifests.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared dependencies: module name -> requested version spec.
pub type Dependencies = BTreeMap<String, String>;

/// File name of a manifest inside a module directory and in the store.
pub const MANIFEST_FILE: &str = "modhub.json";

/// One module version's own declared dependencies plus opaque metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Everything else in the document, preserved as-is.
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>, dependencies: Dependencies) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies,
            metadata: BTreeMap::new(),
        }
    }

    /// Decode a stored manifest. `module` names the object in errors.
    ///
    /// # Errors
    /// Returns `InvalidData` if the bytes are not a manifest document.
    pub fn from_slice(module: &str, bytes: &[u8]) -> Result<Self, RegistryError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RegistryError::invalid_data(format!("manifest of {module}"), e))
    }

    /// Encode for storage.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, RegistryError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
