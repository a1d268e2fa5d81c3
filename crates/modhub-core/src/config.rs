//! Registry configuration.

use crate::paths::store_dir;
use crate::storage::{GITHUB_API, GITHUB_RAW};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the local module store.
pub const STORE_ENV: &str = "MODHUB_STORE";

/// Environment variable naming an HTTP object store consulted after the local one.
pub const REGISTRY_ENV: &str = "MODHUB_REGISTRY";

/// Environment variable overriding the GitHub API base URL.
pub const GITHUB_API_ENV: &str = "MODHUB_GITHUB_API";

/// Environment variable overriding the GitHub raw-content base URL.
pub const GITHUB_RAW_ENV: &str = "MODHUB_GITHUB_RAW";

/// Environment variable carrying a GitHub access token.
pub const GITHUB_TOKEN_ENV: &str = "MODHUB_GITHUB_TOKEN";

/// Default destination directory, relative to the host root.
pub const DEFAULT_MODULES_DIR: &str = "modules";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Local module store root.
    pub store: PathBuf,

    /// HTTP object store with the same layout as the local one.
    pub registry_url: Option<String>,

    pub github_api: String,

    pub github_raw: String,

    #[serde(skip_serializing)]
    pub github_token: Option<String>,

    /// Destination directory name under the host root.
    pub modules_dir: String,

    /// Dump into `<name>@<version>` instead of `<name>`.
    pub versioned: bool,

    /// Pass unresolvable specs through verbatim.
    pub optimistic: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: store_dir(),
            registry_url: None,
            github_api: GITHUB_API.to_string(),
            github_raw: GITHUB_RAW.to_string(),
            github_token: None,
            modules_dir: DEFAULT_MODULES_DIR.to_string(),
            versioned: false,
            optimistic: false,
        }
    }
}

impl RegistryConfig {
    /// Defaults with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides read through `lookup`. Empty values are ignored.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(store) = get(STORE_ENV) {
            config.store = PathBuf::from(store);
        }
        config.registry_url = get(REGISTRY_ENV);
        if let Some(api) = get(GITHUB_API_ENV) {
            config.github_api = api;
        }
        if let Some(raw) = get(GITHUB_RAW_ENV) {
            config.github_raw = raw;
        }
        config.github_token = get(GITHUB_TOKEN_ENV);

        config
    }

    #[must_use]
    pub fn with_store(mut self, store: impl Into<PathBuf>) -> Self {
        self.store = store.into();
        self
    }

    #[must_use]
    pub fn with_registry_url(mut self, url: Option<String>) -> Self {
        self.registry_url = url;
        self
    }

    #[must_use]
    pub fn with_github(mut self, api: impl Into<String>, raw: impl Into<String>) -> Self {
        self.github_api = api.into();
        self.github_raw = raw.into();
        self
    }

    #[must_use]
    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    #[must_use]
    pub fn with_modules_dir(mut self, dir: impl Into<String>) -> Self {
        self.modules_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    #[must_use]
    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }
}
