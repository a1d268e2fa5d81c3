//! Dependency resolution.
//!
//! Every declared dependency is resolved concurrently: its module database is
//! fetched, the strategy picks a concrete version, and that version's
//! manifest is expanded recursively. Siblings are always awaited to the end,
//! even after one of them fails; the first failure is what the caller sees.
//!
//! A dependency whose `name@version` already appears on the path from the
//! root is marked circular and not expanded again.

use crate::barrier::join_settled;
use crate::context::Context;
use crate::database::Database;
use crate::error::RegistryError;
use crate::manifest::{Dependencies, Manifest};
use crate::storage::{ObjectKind, Storage};
use crate::strategy::ResolveStrategy;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// One resolved dependency and its own resolved dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyNode {
    pub context: Context,
    /// Spec exactly as declared by the parent.
    pub requested: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, DependencyNode>,
    /// Already being expanded higher up this branch; not expanded again.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub circular: bool,
}

/// Resolved dependencies of one host module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyTree {
    pub name: String,
    pub dependencies: BTreeMap<String, DependencyNode>,
}

impl DependencyTree {
    /// Every node, depth-first in declaration order.
    pub fn walk(&self) -> impl Iterator<Item = &DependencyNode> {
        let mut stack: Vec<&DependencyNode> = self.dependencies.values().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.dependencies.values().rev());
            Some(node)
        })
    }
}

/// Objects fetched during one session, keyed by storage key.
///
/// Absent objects are cached too, so a missing manifest is asked for once.
#[derive(Debug, Default)]
struct Session {
    databases: RwLock<HashMap<String, Option<Database>>>,
    manifests: RwLock<HashMap<String, Option<Manifest>>>,
}

/// `name@version` keys from the root down to the node being expanded.
#[derive(Debug)]
struct Chain {
    key: String,
    parent: Option<Arc<Chain>>,
}

fn chain_contains(chain: Option<&Arc<Chain>>, key: &str) -> bool {
    let mut current = chain;
    while let Some(link) = current {
        if link.key == key {
            return true;
        }
        current = link.parent.as_ref();
    }
    false
}

/// Resolves dependency maps into trees.
///
/// One resolver is one session: databases and manifests it fetches are
/// reused by every later call on it. Use a fresh resolver per install.
#[derive(Debug, Clone)]
pub struct Resolver {
    storage: Arc<Storage>,
    strategy: Arc<dyn ResolveStrategy>,
    session: Arc<Session>,
}

impl Resolver {
    pub fn new(storage: Arc<Storage>, strategy: Arc<dyn ResolveStrategy>) -> Self {
        Self {
            storage,
            strategy,
            session: Arc::default(),
        }
    }

    /// Resolve a host module's dependency map.
    ///
    /// # Errors
    /// Returns the first resolution, data or transport error.
    pub async fn resolve(&self, name: &str, dependencies: &Dependencies) -> Result<DependencyTree, RegistryError> {
        let dependencies = self.resolve_all(dependencies.clone(), None).await?;
        debug!(module = name, direct = dependencies.len(), "Resolved dependency tree");
        Ok(DependencyTree {
            name: name.to_string(),
            dependencies,
        })
    }

    /// Resolve a single `name: spec` dependency.
    ///
    /// # Errors
    /// Returns the first resolution, data or transport error.
    pub async fn resolve_dependency(&self, name: &str, spec: &str) -> Result<DependencyNode, RegistryError> {
        self.resolve_node(name.to_string(), spec.to_string(), None).await
    }

    fn resolve_all(
        &self,
        dependencies: Dependencies,
        chain: Option<Arc<Chain>>,
    ) -> BoxFuture<'_, Result<BTreeMap<String, DependencyNode>, RegistryError>> {
        async move {
            let names: Vec<String> = dependencies.keys().cloned().collect();
            let nodes = join_settled(
                dependencies
                    .into_iter()
                    .map(|(name, spec)| self.resolve_node(name, spec, chain.clone())),
            )
            .await?;
            Ok(names.into_iter().zip(nodes).collect())
        }
        .boxed()
    }

    fn resolve_node(
        &self,
        name: String,
        spec: String,
        chain: Option<Arc<Chain>>,
    ) -> BoxFuture<'_, Result<DependencyNode, RegistryError>> {
        async move {
            let requested = Context::from_dependency(&name, &spec)?;

            let database = self
                .database(&requested)
                .await?
                .ok_or_else(|| RegistryError::DatabaseNotFound {
                    name: requested.name().to_string(),
                })?;

            let version = self
                .strategy
                .resolve(&database, requested.version())?
                .ok_or_else(|| RegistryError::VersionNotFound {
                    name: requested.name().to_string(),
                    spec: requested.version().to_string(),
                    available: database.versions().into_iter().map(String::from).collect(),
                })?;

            let location = database.location(&version).map(String::from);
            let context = requested.resolved(version, location);
            let key = context.key();
            trace!(dependency = %name, spec = %spec, resolved = %key, "Resolved version");

            if chain_contains(chain.as_ref(), &key) {
                debug!(module = %key, "Circular dependency, not expanding");
                return Ok(DependencyNode {
                    context,
                    requested: spec,
                    dependencies: BTreeMap::new(),
                    circular: true,
                });
            }

            let declared = match self.manifest(&context).await? {
                Some(manifest) => manifest.dependencies,
                // Repositories without a manifest have no dependencies
                None if context.is_remote() => Dependencies::new(),
                None => return Err(RegistryError::ManifestNotFound { module: key }),
            };

            let chain = Some(Arc::new(Chain { key, parent: chain }));
            let dependencies = self.resolve_all(declared, chain).await?;

            Ok(DependencyNode {
                context,
                requested: spec,
                dependencies,
                circular: false,
            })
        }
        .boxed()
    }

    async fn database(&self, ctx: &Context) -> Result<Option<Database>, RegistryError> {
        let key = self.storage.key(ObjectKind::Database, ctx);
        if let Some(cached) = self.session.databases.read().await.get(&key) {
            return Ok(cached.clone());
        }

        let database = self.storage.database(ctx).await?;
        self.session
            .databases
            .write()
            .await
            .insert(key, database.clone());
        Ok(database)
    }

    async fn manifest(&self, ctx: &Context) -> Result<Option<Manifest>, RegistryError> {
        let key = self.storage.key(ObjectKind::Manifest, ctx);
        if let Some(cached) = self.session.manifests.read().await.get(&key) {
            return Ok(cached.clone());
        }

        let manifest = self.storage.manifest(ctx).await?;
        self.session
            .manifests
            .write()
            .await
            .insert(key, manifest.clone());
        Ok(manifest)
    }
}
