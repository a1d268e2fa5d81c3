//! Driver combinators.

use super::{ByteStream, Driver};
use crate::error::RegistryError;
use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use tracing::warn;

/// Rejects writes, forwards reads.
#[derive(Debug, Clone)]
pub struct ReadOnly<D> {
    inner: D,
}

impl<D: Driver> ReadOnly<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    fn rejected(&self) -> RegistryError {
        RegistryError::ReadOnly {
            driver: self.inner.name().to_string(),
        }
    }
}

impl<D: Driver> Driver for ReadOnly<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>> {
        self.inner.has_obj(key)
    }

    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>> {
        self.inner.read_obj(key)
    }

    fn open_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ByteStream>, RegistryError>> {
        self.inner.open_obj(key)
    }

    fn put_obj<'a>(&'a self, _key: &'a str, _data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>> {
        let err = self.rejected();
        async move { Err(err) }.boxed()
    }

    fn delete_obj<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        let err = self.rejected();
        async move { Err(err) }.boxed()
    }
}

/// Several drivers tried in order.
///
/// Reads return the first driver that has the object. A failing driver is
/// skipped; its error is only reported if no later driver has the object.
/// Writes go to every writable driver concurrently.
#[derive(Debug, Clone)]
pub struct CompositeDriver {
    drivers: Vec<Arc<dyn Driver>>,
}

impl CompositeDriver {
    pub fn new(drivers: Vec<Arc<dyn Driver>>) -> Self {
        Self { drivers }
    }

    /// Try each driver in order until one returns `Some`.
    async fn first_found<'a, T, F>(&'a self, key: &'a str, op: F) -> Result<Option<T>, RegistryError>
    where
        F: Fn(&'a dyn Driver) -> BoxFuture<'a, Result<Option<T>, RegistryError>>,
    {
        let mut first_error = None;

        for driver in &self.drivers {
            match op(driver.as_ref()).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) => {
                    warn!(driver = driver.name(), key, error = %e, "Driver failed, trying next");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn fan_out<'a, F>(&'a self, op: F) -> Result<(), RegistryError>
    where
        F: Fn(&'a dyn Driver) -> BoxFuture<'a, Result<(), RegistryError>>,
    {
        let writable: Vec<&'a dyn Driver> = self
            .drivers
            .iter()
            .map(|d| d.as_ref())
            .filter(|d| !d.is_read_only())
            .collect();
        if writable.is_empty() {
            return Err(RegistryError::ReadOnly {
                driver: self.name().to_string(),
            });
        }

        let results = join_all(writable.iter().map(|d| op(*d))).await;
        let errors: Vec<String> = writable
            .iter()
            .zip(results)
            .filter_map(|(d, r)| r.err().map(|e| format!("{}: {e}", d.name())))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::WriteFailed { errors })
        }
    }
}

impl Driver for CompositeDriver {
    fn name(&self) -> &str {
        "composite"
    }

    fn is_read_only(&self) -> bool {
        self.drivers.iter().all(|d| d.is_read_only())
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>> {
        async move {
            let found = self
                .first_found(key, |d| {
                    d.has_obj(key)
                        .map(|r| r.map(|has| has.then_some(())))
                        .boxed()
                })
                .await?;
            Ok(found.is_some())
        }
        .boxed()
    }

    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>> {
        self.first_found(key, move |d| d.read_obj(key)).boxed()
    }

    fn open_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ByteStream>, RegistryError>> {
        self.first_found(key, move |d| d.open_obj(key)).boxed()
    }

    fn put_obj<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>> {
        self.fan_out(move |d| d.put_obj(key, data.clone())).boxed()
    }

    fn delete_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        self.fan_out(move |d| d.delete_obj(key)).boxed()
    }
}

/// Reports exhausted request allowances on reads as `RateLimited`.
#[derive(Debug, Clone)]
pub struct RateLimitClassifier<D> {
    inner: D,
}

impl<D: Driver> RateLimitClassifier<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

impl<D: Driver> Driver for RateLimitClassifier<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>> {
        let driver = self.inner.name();
        self.inner
            .has_obj(key)
            .map(move |r| r.map_err(|e| e.classify_rate_limit(driver)))
            .boxed()
    }

    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>> {
        let driver = self.inner.name();
        self.inner
            .read_obj(key)
            .map(move |r| r.map_err(|e| e.classify_rate_limit(driver)))
            .boxed()
    }

    fn open_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ByteStream>, RegistryError>> {
        let driver = self.inner.name();
        self.inner
            .open_obj(key)
            .map(move |r| r.map_err(|e| e.classify_rate_limit(driver)))
            .boxed()
    }

    fn put_obj<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>> {
        self.inner.put_obj(key, data)
    }

    fn delete_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        self.inner.delete_obj(key)
    }
}
