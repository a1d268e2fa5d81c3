//! Materialization of resolved trees onto disk.

use crate::archive::ModuleInstance;
use crate::barrier::{join_first_error, Barrier};
use crate::context::Context;
use crate::error::{RegistryError, VersionConflict};
use crate::resolver::DependencyTree;
use crate::storage::Storage;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where and how resolved modules are written.
pub trait DumpDriver: Send + Sync + fmt::Debug {
    /// Directory a module is materialized into.
    fn destination(&self, ctx: &Context) -> PathBuf;

    fn has_dumped<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<bool, RegistryError>>;

    /// Unpack `instance` into the module's destination and return it.
    fn dump<'a>(
        &'a self,
        ctx: &'a Context,
        instance: ModuleInstance,
    ) -> BoxFuture<'a, Result<PathBuf, RegistryError>>;
}

/// Dumps into `<root>/<name>` (or `<root>/<name>@<version>` when versioned).
///
/// Each module is unpacked into a scratch directory next to its destination
/// and renamed into place, so a destination is either absent or complete.
/// [`VERSION_MARKER`] records which version occupies it; finding another
/// version there is a conflict.
#[derive(Debug, Clone)]
pub struct FsDumpDriver {
    root: PathBuf,
    versioned: bool,
}

impl FsDumpDriver {
    pub fn new(root: impl Into<PathBuf>, versioned: bool) -> Self {
        Self {
            root: root.into(),
            versioned,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DumpDriver for FsDumpDriver {
    fn destination(&self, ctx: &Context) -> PathBuf {
        if self.versioned {
            self.root.join(format!("{}@{}", ctx.name(), ctx.version()))
        } else {
            self.root.join(ctx.name())
        }
    }

    fn has_dumped<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<bool, RegistryError>> {
        async move {
            match occupant(&self.destination(ctx)).await? {
                Occupant::Vacant => Ok(false),
                Occupant::Version(version) if version == ctx.version() => Ok(true),
                Occupant::Version(version) => Err(occupied_by(ctx, version)),
                Occupant::Foreign => {
                    warn!(module = %ctx, "Destination exists without a version marker, leaving it alone");
                    Ok(true)
                }
            }
        }
        .boxed()
    }

    fn dump<'a>(
        &'a self,
        ctx: &'a Context,
        instance: ModuleInstance,
    ) -> BoxFuture<'a, Result<PathBuf, RegistryError>> {
        async move {
            let dest = self.destination(ctx);
            let parent = dest.parent().unwrap_or(&self.root).to_path_buf();
            tokio::fs::create_dir_all(&parent).await?;

            let scratch = tempfile::Builder::new()
                .prefix(".modhub-dump-")
                .tempdir_in(&parent)?;
            let files = instance.extract(scratch.path()).await?;
            tokio::fs::write(scratch.path().join(VERSION_MARKER), ctx.version()).await?;

            // Dropping `scratch` afterwards removes whatever was not moved
            if let Err(e) = tokio::fs::rename(scratch.path(), &dest).await {
                // Someone else finished a module with this destination first
                match occupant(&dest).await? {
                    Occupant::Version(version) if version == ctx.version() => {}
                    Occupant::Version(version) => return Err(occupied_by(ctx, version)),
                    Occupant::Vacant | Occupant::Foreign => return Err(e.into()),
                }
            }

            debug!(module = %ctx, dest = %dest.display(), files, "Dumped module");
            Ok(dest)
        }
        .boxed()
    }
}

/// File inside a dumped module recording which version occupies it.
pub const VERSION_MARKER: &str = ".modhub-version";

enum Occupant {
    Vacant,
    Version(String),
    /// A directory without a version marker.
    Foreign,
}

async fn occupant(dest: &Path) -> Result<Occupant, RegistryError> {
    match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(Occupant::Foreign),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Occupant::Vacant),
        Err(e) => return Err(e.into()),
    }
    match tokio::fs::read_to_string(dest.join(VERSION_MARKER)).await {
        Ok(version) => Ok(Occupant::Version(version.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Occupant::Foreign),
        Err(e) => Err(e.into()),
    }
}

/// Destination already holds another version of the module.
fn occupied_by(ctx: &Context, existing: String) -> RegistryError {
    RegistryError::Conflict {
        conflicts: vec![VersionConflict {
            name: ctx.name().to_string(),
            versions: vec![existing, ctx.version().to_string()],
        }],
    }
}

/// Outcome of one dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    /// Destinations written by this dump.
    pub dumped: Vec<PathBuf>,
    /// Modules that were already present.
    pub skipped: Vec<String>,
}

impl DumpSummary {
    pub fn merge(&mut self, other: DumpSummary) {
        self.dumped.extend(other.dumped);
        self.skipped.extend(other.skipped);
    }
}

/// Flattens resolved trees and materializes them through a [`DumpDriver`].
#[derive(Debug, Clone)]
pub struct Dumper {
    storage: Arc<Storage>,
    barrier: Barrier,
}

impl Dumper {
    /// Materializations are registered on `barrier`, which stays pending
    /// until every one has landed, including those still running after a
    /// failed dump.
    pub fn new(storage: Arc<Storage>, barrier: Barrier) -> Self {
        Self { storage, barrier }
    }

    /// Every resolved module in the tree, depth-first, once per `name@version`.
    ///
    /// A circular node contributes itself but is not expanded.
    #[must_use]
    pub fn flatten(tree: &DependencyTree) -> Vec<Context> {
        let mut seen = HashSet::new();
        tree.walk()
            .filter(|node| seen.insert(node.context.key()))
            .map(|node| node.context.clone())
            .collect()
    }

    /// Fail if any module name appears at more than one version.
    ///
    /// # Errors
    /// Returns `Conflict` naming every conflicting module with all its versions.
    pub fn check_conflicts(modules: &[Context]) -> Result<(), RegistryError> {
        let mut by_name: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for ctx in modules {
            let versions = by_name.entry(ctx.name()).or_default();
            if !versions.iter().any(|v| v == ctx.version()) {
                versions.push(ctx.version().to_string());
            }
        }

        let conflicts: Vec<VersionConflict> = by_name
            .into_iter()
            .filter(|(_, versions)| versions.len() > 1)
            .map(|(name, versions)| VersionConflict {
                name: name.to_string(),
                versions,
            })
            .collect();

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Conflict { conflicts })
        }
    }

    /// Flatten, check for conflicts, then materialize every module concurrently.
    ///
    /// Nothing is written if the tree has a conflict. After the first failed
    /// module the remaining ones keep running; await the barrier to know
    /// when they have landed.
    ///
    /// # Errors
    /// Returns `Conflict`, or the first storage or extraction error.
    pub async fn dump(
        &self,
        tree: &DependencyTree,
        driver: Arc<dyn DumpDriver>,
    ) -> Result<DumpSummary, RegistryError> {
        let modules = Self::flatten(tree);
        Self::check_conflicts(&modules)?;
        debug!(host = %tree.name, modules = modules.len(), "Dumping dependency tree");
        self.materialize(modules, driver).await
    }

    /// Materialize already flattened and conflict-checked modules.
    ///
    /// # Errors
    /// Returns the first storage or extraction error.
    pub async fn materialize(
        &self,
        modules: Vec<Context>,
        driver: Arc<dyn DumpDriver>,
    ) -> Result<DumpSummary, RegistryError> {
        let jobs = modules.into_iter().map(|ctx| {
            let storage = Arc::clone(&self.storage);
            let driver = Arc::clone(&driver);
            async move {
                if driver.has_dumped(&ctx).await? {
                    info!(module = %ctx, "Already dumped, skipping");
                    return Ok(Materialized::Skipped(ctx.key()));
                }
                let instance = storage.instance(&ctx).await?;
                let dest = driver.dump(&ctx, instance).await?;
                Ok::<_, RegistryError>(Materialized::Dumped(dest))
            }
        });

        let mut summary = DumpSummary::default();
        for outcome in join_first_error(&self.barrier, jobs).await? {
            match outcome {
                Materialized::Dumped(dest) => summary.dumped.push(dest),
                Materialized::Skipped(key) => summary.skipped.push(key),
            }
        }
        Ok(summary)
    }
}

enum Materialized {
    Dumped(PathBuf),
    Skipped(String),
}
