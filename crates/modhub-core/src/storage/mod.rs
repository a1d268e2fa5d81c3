//! Module storage.
//!
//! Storage is split into *where* and *how*:
//! - a [`LocationStrategy`] maps a [`Context`] to the key of each object kind
//!   (database, manifest, archive);
//! - a [`Driver`] reads and writes keyed objects over one transport.
//!
//! [`Storage`] combines both, choosing the strategy and driver from the
//! context's kind, and decodes objects into their typed forms.

pub mod fs;
pub mod http;
pub mod layers;
pub mod location;

pub use fs::FsDriver;
pub use http::{HttpDriver, GITHUB_API, GITHUB_DRIVER, GITHUB_RAW};
pub use layers::{CompositeDriver, RateLimitClassifier, ReadOnly};
pub use location::{DefaultLocation, LocationSelector, LocationStrategy, RemoteLocation};

use crate::archive::{Archive, ModuleInstance, PathFilter, RemoteInstance};
use crate::config::RegistryConfig;
use crate::context::{Context, ContextKind};
use crate::database::Database;
use crate::error::RegistryError;
use crate::manifest::Manifest;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Live body of an object, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, RegistryError>>;

/// The three kinds of stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Database,
    Manifest,
    Archive,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Database => "database",
            Self::Manifest => "manifest",
            Self::Archive => "archive",
        })
    }
}

/// Keyed object access over one transport.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Short name used in errors and logs.
    fn name(&self) -> &str;

    fn is_read_only(&self) -> bool {
        false
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>>;

    /// `Ok(None)` when the object does not exist.
    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>>;

    /// Open an object as a stream. Buffers through [`Driver::read_obj`] unless overridden.
    fn open_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ByteStream>, RegistryError>> {
        async move {
            let bytes = self.read_obj(key).await?;
            Ok(bytes.map(|b| futures::stream::once(futures::future::ready(Ok(b))).boxed()))
        }
        .boxed()
    }

    fn put_obj<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>>;

    fn delete_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>>;
}

impl<D: Driver + ?Sized> Driver for Arc<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>> {
        (**self).has_obj(key)
    }

    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>> {
        (**self).read_obj(key)
    }

    fn open_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ByteStream>, RegistryError>> {
        (**self).open_obj(key)
    }

    fn put_obj<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>> {
        (**self).put_obj(key, data)
    }

    fn delete_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        (**self).delete_obj(key)
    }
}

/// Tag-listing databases keyed by repository coordinate.
///
/// Shared by every [`Storage`] it is handed to, for as long as any of them
/// lives. Entries are never refreshed, so treat them as possibly stale.
#[derive(Debug, Clone, Default)]
pub struct TagCache {
    inner: Arc<RwLock<HashMap<String, Database>>>,
}

impl TagCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, coordinate: &str) -> Option<Database> {
        self.inner.read().await.get(coordinate).cloned()
    }

    pub async fn insert(&self, coordinate: impl Into<String>, database: Database) {
        self.inner.write().await.insert(coordinate.into(), database);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Typed access to databases, manifests and archives.
#[derive(Debug, Clone)]
pub struct Storage {
    standard: Arc<dyn Driver>,
    remote: Arc<dyn Driver>,
    locations: LocationSelector,
    tags: TagCache,
}

impl Storage {
    pub fn new(
        standard: Arc<dyn Driver>,
        remote: Arc<dyn Driver>,
        locations: LocationSelector,
        tags: TagCache,
    ) -> Self {
        Self {
            standard,
            remote,
            locations,
            tags,
        }
    }

    /// Build the configured driver stack.
    ///
    /// Standard modules are read from the local store first, then from the
    /// HTTP registry if one is configured. Repository-hosted modules go
    /// through the GitHub transport with rate-limit classification. Both HTTP
    /// drivers are read-only, so publishing only writes the local store.
    ///
    /// # Errors
    /// Returns an error if a configured URL is invalid or an HTTP client cannot be built.
    pub fn from_config(config: &RegistryConfig, tags: TagCache) -> Result<Self, RegistryError> {
        let local: Arc<dyn Driver> = Arc::new(FsDriver::new(&config.store));

        let standard: Arc<dyn Driver> = match &config.registry_url {
            Some(url) => {
                let http = HttpDriver::new("registry", Some(url), config.github_token.clone())?;
                let registry: Arc<dyn Driver> = Arc::new(RateLimitClassifier::new(ReadOnly::new(http)));
                Arc::new(CompositeDriver::new(vec![local, registry]))
            }
            None => local,
        };

        let remote: Arc<dyn Driver> = Arc::new(RateLimitClassifier::new(HttpDriver::github(
            config.github_token.clone(),
        )?));

        let locations = LocationSelector::new(RemoteLocation::new(&config.github_api, &config.github_raw)?);

        Ok(Self::new(standard, remote, locations, tags))
    }

    #[must_use]
    pub fn tags(&self) -> &TagCache {
        &self.tags
    }

    fn driver_for(&self, ctx: &Context) -> &dyn Driver {
        match ctx.kind() {
            ContextKind::Standard => self.standard.as_ref(),
            ContextKind::Remote(_) => self.remote.as_ref(),
        }
    }

    /// Storage key of one object of `ctx`.
    #[must_use]
    pub fn key(&self, kind: ObjectKind, ctx: &Context) -> String {
        self.locations.for_context(ctx).key(kind, ctx)
    }

    /// Fetch the version database of `ctx`'s module.
    ///
    /// Repository-hosted databases are built from the first page of the tag
    /// listing and served from the tag cache afterwards.
    ///
    /// # Errors
    /// Returns transport errors, or `InvalidData` for an undecodable object.
    pub async fn database(&self, ctx: &Context) -> Result<Option<Database>, RegistryError> {
        let key = self.key(ObjectKind::Database, ctx);

        match ctx.kind() {
            ContextKind::Remote(repository) => {
                let coordinate = repository.coordinate();
                if let Some(db) = self.tags.get(&coordinate).await {
                    debug!(repository = %coordinate, "Tag listing served from cache");
                    return Ok(Some(db));
                }

                let Some(body) = self.remote.read_obj(&key).await? else {
                    return Ok(None);
                };
                let db = Database::from_tag_listing(ctx.name(), &body)?;
                debug!(repository = %coordinate, tags = db.versions.len(), "Listed repository tags");
                self.tags.insert(coordinate, db.clone()).await;
                Ok(Some(db))
            }
            ContextKind::Standard => {
                let Some(body) = self.standard.read_obj(&key).await? else {
                    return Ok(None);
                };
                Database::from_slice(ctx.name(), &body).map(Some)
            }
        }
    }

    /// Fetch the manifest of a resolved `ctx`.
    ///
    /// # Errors
    /// Returns transport errors, or `InvalidData` for an undecodable object.
    pub async fn manifest(&self, ctx: &Context) -> Result<Option<Manifest>, RegistryError> {
        let key = self.key(ObjectKind::Manifest, ctx);
        let Some(body) = self.driver_for(ctx).read_obj(&key).await? else {
            return Ok(None);
        };
        Manifest::from_slice(&ctx.key(), &body).map(Some)
    }

    /// Open the archive of a resolved `ctx`.
    ///
    /// Standard archives are read whole; repository tarballs stay a live
    /// stream until extracted.
    ///
    /// # Errors
    /// Returns `ArchiveNotFound` if there is no archive, or transport errors.
    pub async fn instance(&self, ctx: &Context) -> Result<ModuleInstance, RegistryError> {
        let key = self.key(ObjectKind::Archive, ctx);
        let not_found = || RegistryError::ArchiveNotFound { module: ctx.key() };

        match ctx.kind() {
            ContextKind::Remote(repository) => {
                let stream = self.remote.open_obj(&key).await?.ok_or_else(not_found)?;
                let filter = PathFilter::for_module(ctx.name(), Some(repository.repo.as_str()));
                Ok(ModuleInstance::Stream(RemoteInstance::new(stream, filter)))
            }
            ContextKind::Standard => {
                let bytes = self.standard.read_obj(&key).await?.ok_or_else(not_found)?;
                Ok(ModuleInstance::Archive(Archive::from_bytes(bytes)))
            }
        }
    }

    /// Store a module version: database entry, manifest and archive.
    ///
    /// # Errors
    /// Returns `ReadOnly` for repository-hosted modules, or any driver error.
    pub async fn publish(
        &self,
        ctx: &Context,
        manifest: &Manifest,
        archive: &Archive,
    ) -> Result<(), RegistryError> {
        if ctx.is_remote() {
            return Err(RegistryError::ReadOnly {
                driver: self.remote.name().to_string(),
            });
        }

        let mut db = self
            .database(ctx)
            .await?
            .unwrap_or_else(|| Database::new(ctx.name()));
        db.add_version(ctx.version(), ctx.location().map(String::from));

        self.standard
            .put_obj(&self.key(ObjectKind::Archive, ctx), archive.as_bytes().clone())
            .await?;
        self.standard
            .put_obj(&self.key(ObjectKind::Manifest, ctx), Bytes::from(manifest.to_vec()?))
            .await?;
        self.standard
            .put_obj(&self.key(ObjectKind::Database, ctx), Bytes::from(db.to_vec()?))
            .await?;

        debug!(module = %ctx, digest = %archive.digest(), "Published module");
        Ok(())
    }

    /// Remove a module version. Returns `false` if it was not published.
    ///
    /// The database object is deleted once its last version is gone.
    ///
    /// # Errors
    /// Returns `ReadOnly` for repository-hosted modules, or any driver error.
    pub async fn unpublish(&self, ctx: &Context) -> Result<bool, RegistryError> {
        if ctx.is_remote() {
            return Err(RegistryError::ReadOnly {
                driver: self.remote.name().to_string(),
            });
        }

        let Some(mut db) = self.database(ctx).await? else {
            return Ok(false);
        };
        if !db.remove_version(ctx.version()) {
            return Ok(false);
        }

        let db_key = self.key(ObjectKind::Database, ctx);
        if db.is_empty() {
            self.standard.delete_obj(&db_key).await?;
        } else {
            self.standard.put_obj(&db_key, Bytes::from(db.to_vec()?)).await?;
        }
        self.standard
            .delete_obj(&self.key(ObjectKind::Manifest, ctx))
            .await?;
        self.standard
            .delete_obj(&self.key(ObjectKind::Archive, ctx))
            .await?;

        debug!(module = %ctx, "Unpublished module");
        Ok(true)
    }
}
