//! Local filesystem driver.

use super::Driver;
use crate::error::RegistryError;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use modhub_util::fs::{atomic_write, remove_file_if_exists};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Objects stored as files under a root directory, keyed by relative path.
#[derive(Debug, Clone)]
pub struct FsDriver {
    root: PathBuf,
}

impl FsDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, refusing anything that escapes it.
    fn path_for(&self, key: &str) -> Result<PathBuf, RegistryError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(RegistryError::Other(format!("Invalid storage key '{key}'")));
        }
        Ok(self.root.join(rel))
    }
}

impl Driver for FsDriver {
    fn name(&self) -> &str {
        "fs"
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>> {
        async move {
            let path = self.path_for(key)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>> {
        async move {
            let path = self.path_for(key)?;
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn put_obj<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>> {
        async move {
            let path = self.path_for(key)?;
            tokio::task::spawn_blocking(move || atomic_write(&path, &data)).await??;
            Ok(())
        }
        .boxed()
    }

    fn delete_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        async move {
            let path = self.path_for(key)?;
            tokio::task::spawn_blocking(move || remove_file_if_exists(&path)).await??;
            Ok(())
        }
        .boxed()
    }
}
