//! HTTP driver.
//!
//! Objects are read with GET/HEAD, written with PUT and removed with DELETE.
//! Keys are either absolute URLs or paths joined onto the driver's base URL.
//! Stores that must not be written are wrapped in [`ReadOnly`].

use super::{ByteStream, Driver, ReadOnly};
use crate::error::RegistryError;
use crate::version::user_agent;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{redirect, Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Name of the GitHub driver.
pub const GITHUB_DRIVER: &str = "github";

/// Default GitHub API base URL.
pub const GITHUB_API: &str = "https://api.github.com/";

/// Default GitHub raw-content base URL.
pub const GITHUB_RAW: &str = "https://raw.githubusercontent.com/";

/// Retries after a failed send (connection errors, timeouts).
const MAX_RETRIES: u32 = 2;

const RETRY_DELAY: Duration = Duration::from_millis(200);

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Object access over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDriver {
    name: String,
    base_url: Option<Url>,
    http: Client,
    token: Option<String>,
}

impl HttpDriver {
    /// Create a driver. Relative keys need a `base_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(name: &str, base_url: Option<&str>, token: Option<String>) -> Result<Self, RegistryError> {
        let base_url = base_url
            .map(|raw| {
                let normalized = if raw.ends_with('/') {
                    raw.to_string()
                } else {
                    format!("{raw}/")
                };
                Url::parse(&normalized)
                    .map_err(|e| RegistryError::Other(format!("Invalid registry URL '{raw}': {e}")))
            })
            .transpose()?;

        // Tarball endpoints answer with a single redirect to the archive host
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .user_agent(user_agent())
            .redirect(redirect::Policy::limited(1))
            .build()
            .map_err(|e| RegistryError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            base_url,
            http,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Read-only driver for GitHub; keys are the absolute URLs of the remote layout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn github(token: Option<String>) -> Result<ReadOnly<Self>, RegistryError> {
        Ok(ReadOnly::new(Self::new(GITHUB_DRIVER, None, token)?))
    }

    fn url_for(&self, key: &str) -> Result<Url, RegistryError> {
        if let Ok(url) = Url::parse(key) {
            return Ok(url);
        }
        let base = self.base_url.as_ref().ok_or_else(|| {
            RegistryError::Other(format!("Driver '{}' cannot address relative key '{key}'", self.name))
        })?;
        base.join(key)
            .map_err(|e| RegistryError::Other(format!("Failed to build URL for '{key}': {e}")))
    }

    /// Send a request, retrying transient send failures.
    ///
    /// Returns `None` for 404 and an error for any other unsuccessful status.
    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<Bytes>,
    ) -> Result<Option<Response>, RegistryError> {
        let url = self.url_for(key)?;
        let mut attempt = 0;

        let response = loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header(ACCEPT, "application/vnd.github+json, application/json, */*");
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            match request.send().await {
                Ok(response) => break response,
                Err(e) if attempt < MAX_RETRIES && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    warn!(url = %url, attempt, error = %e, "Request failed, retrying");
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let status = response.status();
        debug!(method = %method, url = %url, status = status.as_u16(), "HTTP response");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(&method, &url, status, response.headers()));
        }
        Ok(Some(response))
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn status_error(method: &Method, url: &Url, status: StatusCode, headers: &HeaderMap) -> RegistryError {
    RegistryError::Transport {
        message: format!("{method} {url} returned status {status}"),
        status: Some(status.as_u16()),
        rate_limit_remaining: header_u64(headers, RATE_LIMIT_REMAINING),
        rate_limit_reset: header_u64(headers, RATE_LIMIT_RESET),
    }
}

impl Driver for HttpDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, RegistryError>> {
        async move { Ok(self.send(Method::HEAD, key, None).await?.is_some()) }.boxed()
    }

    fn read_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, RegistryError>> {
        async move {
            match self.send(Method::GET, key, None).await? {
                Some(response) => Ok(Some(response.bytes().await?)),
                None => Ok(None),
            }
        }
        .boxed()
    }

    fn open_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ByteStream>, RegistryError>> {
        async move {
            let Some(response) = self.send(Method::GET, key, None).await? else {
                return Ok(None);
            };

            let stream = futures::stream::unfold(Some(response), |state| async move {
                let mut response = state?;
                match response.chunk().await {
                    Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                    Ok(None) => None,
                    Err(e) => Some((Err(RegistryError::from(e)), None)),
                }
            });
            Ok(Some(stream.boxed()))
        }
        .boxed()
    }

    fn put_obj<'a>(&'a self, key: &'a str, data: Bytes) -> BoxFuture<'a, Result<(), RegistryError>> {
        async move {
            self.send(Method::PUT, key, Some(data)).await?.ok_or_else(|| {
                RegistryError::transport(format!("PUT {key} on '{}' returned status 404", self.name))
            })?;
            Ok(())
        }
        .boxed()
    }

    /// Deleting a missing object succeeds.
    fn delete_obj<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        async move {
            self.send(Method::DELETE, key, None).await?;
            Ok(())
        }
        .boxed()
    }
}
