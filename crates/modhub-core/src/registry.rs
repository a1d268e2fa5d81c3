//! Registry entry points: install and publish.

use crate::archive::Archive;
use crate::barrier::{join_first_error, Barrier};
use crate::config::RegistryConfig;
use crate::context::Context;
use crate::dumper::{DumpDriver, DumpSummary, Dumper, FsDumpDriver};
use crate::error::RegistryError;
use crate::manifest::{Dependencies, Manifest, MANIFEST_FILE};
use crate::resolver::{DependencyTree, Resolver};
use crate::storage::{Storage, TagCache};
use crate::strategy::{clean_version, strategy_for, ResolveStrategy};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One module of a host project and what it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostModule {
    pub name: String,
    #[serde(default)]
    pub dependencies: Dependencies,
}

/// The modules of a host project, read from its `modhub.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostManifest {
    /// Directory the manifest was read from.
    pub root: PathBuf,
    pub modules: Vec<HostModule>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HostManifestFile {
    Modules { modules: Vec<HostModule> },
    Single(HostModule),
}

impl HostManifest {
    pub fn new(root: impl Into<PathBuf>, modules: Vec<HostModule>) -> Self {
        Self {
            root: root.into(),
            modules,
        }
    }

    /// Read a host manifest from a file, or from `modhub.json` in a directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a host manifest.
    pub fn read_from(path: &Path) -> Result<Self, RegistryError> {
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        let bytes = std::fs::read(&file)?;
        let parsed: HostManifestFile = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::invalid_data(format!("host manifest {}", file.display()), e))?;

        let modules = match parsed {
            HostManifestFile::Modules { modules } => modules,
            HostManifestFile::Single(module) => vec![module],
        };
        let root = file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Ok(Self { root, modules })
    }

    /// Number of declared dependency edges across all modules.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.modules.iter().map(|m| m.dependencies.len()).sum()
    }
}

/// Outcome of one install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub destination: PathBuf,
    /// Resolved trees, one per declared dependency.
    pub trees: Vec<DependencyTree>,
    pub dump: DumpSummary,
}

/// Resolves, installs and publishes modules against one storage.
#[derive(Debug, Clone)]
pub struct Registry {
    storage: Arc<Storage>,
    config: RegistryConfig,
    strategy: Arc<dyn ResolveStrategy>,
    barrier: Barrier,
}

impl Registry {
    pub fn new(storage: Arc<Storage>, config: RegistryConfig) -> Self {
        let strategy = strategy_for(config.optimistic);
        Self {
            storage,
            config,
            strategy,
            barrier: Barrier::new(),
        }
    }

    /// Build the configured storage stack and a registry over it.
    ///
    /// # Errors
    /// Returns an error if the storage stack cannot be built.
    pub fn from_config(config: RegistryConfig, tags: TagCache) -> Result<Self, RegistryError> {
        let storage = Storage::from_config(&config, tags)?;
        Ok(Self::new(Arc::new(storage), config))
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// A resolver with a fresh session.
    #[must_use]
    pub fn resolver(&self) -> Resolver {
        Resolver::new(Arc::clone(&self.storage), Arc::clone(&self.strategy))
    }

    /// Directory a host's modules are installed into.
    #[must_use]
    pub fn destination(&self, host: &HostManifest) -> PathBuf {
        host.root.join(&self.config.modules_dir)
    }

    /// Resolve and dump every dependency of every host module.
    ///
    /// Every dependency is resolved concurrently within one resolution
    /// session. All host dependencies share one destination, so the union of
    /// their trees is conflict-checked before anything is written. The first
    /// failing job decides the result; the others are left running. Use
    /// [`Registry::settle`] to wait for them.
    ///
    /// # Errors
    /// Returns the first resolution, conflict, transport or extraction error.
    pub async fn install(&self, host: &HostManifest) -> Result<InstallSummary, RegistryError> {
        let destination = self.destination(host);
        let driver: Arc<dyn DumpDriver> =
            Arc::new(FsDumpDriver::new(&destination, self.config.versioned));
        let resolver = self.resolver();

        // Installs land before their extractions, which land before the
        // registry as a whole settles
        let installs = self.barrier.child();
        let dumper = Dumper::new(Arc::clone(&self.storage), installs.child());

        info!(
            root = %host.root.display(),
            dependencies = host.dependency_count(),
            "Installing modules"
        );

        let resolver = &resolver;
        let jobs = host.modules.iter().flat_map(|module| {
            module.dependencies.iter().map(move |(name, spec)| {
                let resolver = resolver.clone();
                let host_name = module.name.clone();
                let (name, spec) = (name.clone(), spec.clone());
                async move {
                    let node = resolver.resolve_dependency(&name, &spec).await?;
                    Ok::<_, RegistryError>(DependencyTree {
                        name: host_name,
                        dependencies: BTreeMap::from([(name, node)]),
                    })
                }
            })
        });
        let trees = join_first_error(&installs, jobs).await?;

        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        for tree in &trees {
            let flat = Dumper::flatten(tree);
            Dumper::check_conflicts(&flat)?;
            modules.extend(flat.into_iter().filter(|ctx| seen.insert(ctx.key())));
        }
        if !self.config.versioned {
            Dumper::check_conflicts(&modules)?;
        }
        debug!(modules = modules.len(), "Dumping resolved modules");

        let summary = InstallSummary {
            destination,
            trees,
            dump: dumper.materialize(modules, driver).await?,
        };

        info!(
            dumped = summary.dump.dumped.len(),
            skipped = summary.dump.skipped.len(),
            "Install complete"
        );
        Ok(summary)
    }

    /// Wait until every operation started by this registry has landed.
    pub async fn settle(&self) {
        self.barrier.wait().await;
    }

    /// Pack `dir` and publish it as `name@version`.
    ///
    /// # Errors
    /// Returns `InvalidSpec` unless `version` is an exact version, `ReadOnly`
    /// for repository-hosted names, or any storage error.
    pub async fn publish(
        &self,
        dir: &Path,
        name: &str,
        version: &str,
        dependencies: Dependencies,
    ) -> Result<Context, RegistryError> {
        if clean_version(version).is_none() {
            return Err(RegistryError::invalid_spec(version, "publishing needs an exact version"));
        }
        let ctx = Context::from_dependency(name, version)?;

        let manifest = Manifest::new(ctx.name(), ctx.version(), dependencies);
        let archive = Archive::load(dir).await?;
        self.storage.publish(&ctx, &manifest, &archive).await?;

        debug!(module = %ctx, bytes = archive.as_bytes().len(), "Published from directory");
        Ok(ctx)
    }

    /// Remove a published version. Returns `false` if it was not published.
    ///
    /// # Errors
    /// Returns `ReadOnly` for repository-hosted names, or any storage error.
    pub async fn unpublish(&self, name: &str, version: &str) -> Result<bool, RegistryError> {
        let ctx = Context::from_dependency(name, version)?;
        self.storage.unpublish(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use tempfile::tempdir;

    fn registry(store: &Path) -> Registry {
        let config = RegistryConfig::default().with_store(store);
        Registry::from_config(config, TagCache::new()).unwrap()
    }

    fn source_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for (rel, contents) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        dir
    }

    #[test]
    fn test_host_manifest_forms() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("modhub.json"),
            r#"{"modules": [{"name": "app", "dependencies": {"a": "^1.0.0"}}, {"name": "tool"}]}"#,
        )
        .unwrap();
        let host = HostManifest::read_from(dir.path()).unwrap();
        assert_eq!(host.root, dir.path());
        assert_eq!(host.modules.len(), 2);
        assert_eq!(host.dependency_count(), 1);

        let single = dir.path().join("single.json");
        std::fs::write(&single, r#"{"name": "app", "dependencies": {"b": "*"}}"#).unwrap();
        let host = HostManifest::read_from(&single).unwrap();
        assert_eq!(host.modules[0].name, "app");
        assert_eq!(host.modules[0].dependencies["b"], "*");

        std::fs::write(&single, "[]").unwrap();
        let err = HostManifest::read_from(&single).unwrap_err();
        assert_eq!(err.code(), codes::MODHUB_INVALID_DATA);
    }

    #[tokio::test]
    async fn test_publish_then_install() {
        let store = tempdir().unwrap();
        let registry = registry(store.path());

        let a = source_dir(&[("src/a.mh", "a")]);
        let b = source_dir(&[("src/b.mh", "b")]);
        registry
            .publish(a.path(), "a", "1.0.0", Dependencies::from([("b".to_string(), "^2.0.0".to_string())]))
            .await
            .unwrap();
        registry
            .publish(b.path(), "b", "2.3.0", Dependencies::new())
            .await
            .unwrap();

        let host_dir = tempdir().unwrap();
        let host = HostManifest::new(
            host_dir.path(),
            vec![HostModule {
                name: "app".to_string(),
                dependencies: Dependencies::from([("a".to_string(), "*".to_string())]),
            }],
        );

        let summary = registry.install(&host).await.unwrap();
        assert_eq!(summary.destination, host_dir.path().join("modules"));
        assert_eq!(summary.dump.dumped.len(), 2);
        assert!(host_dir.path().join("modules/a/src/a.mh").is_file());
        assert!(host_dir.path().join("modules/b/src/b.mh").is_file());

        let tree = &summary.trees[0];
        assert_eq!(tree.dependencies["a"].dependencies["b"].context.version(), "2.3.0");

        registry.settle().await;
    }

    #[tokio::test]
    async fn test_install_reports_first_error() {
        let store = tempdir().unwrap();
        let registry = registry(store.path());
        let a = source_dir(&[("src/a.mh", "a")]);
        registry.publish(a.path(), "a", "1.0.0", Dependencies::new()).await.unwrap();

        let host_dir = tempdir().unwrap();
        let host = HostManifest::new(
            host_dir.path(),
            vec![HostModule {
                name: "app".to_string(),
                dependencies: Dependencies::from([
                    ("a".to_string(), "1.0.0".to_string()),
                    ("missing".to_string(), "1.0.0".to_string()),
                ]),
            }],
        );

        let err = registry.install(&host).await.unwrap_err();
        assert_eq!(err.code(), codes::MODHUB_DATABASE_NOT_FOUND);

        // Nothing is dumped until every dependency has resolved
        registry.settle().await;
        assert!(!host_dir.path().join("modules/a").exists());
    }

    #[tokio::test]
    async fn test_publish_rejects_ranges_and_remote_names() {
        let store = tempdir().unwrap();
        let registry = registry(store.path());
        let dir = source_dir(&[("src/x.mh", "x")]);

        let err = registry
            .publish(dir.path(), "x", "^1.0.0", Dependencies::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::MODHUB_INVALID_SPEC);

        let err = registry
            .publish(dir.path(), "github://acme/x", "1.0.0", Dependencies::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::MODHUB_READ_ONLY);
    }

    #[tokio::test]
    async fn test_unpublish() {
        let store = tempdir().unwrap();
        let registry = registry(store.path());
        let dir = source_dir(&[("src/x.mh", "x")]);
        registry.publish(dir.path(), "x", "1.0.0", Dependencies::new()).await.unwrap();

        assert!(registry.unpublish("x", "1.0.0").await.unwrap());
        assert!(!registry.unpublish("x", "1.0.0").await.unwrap());
    }
}
