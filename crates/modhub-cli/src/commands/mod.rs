pub mod install;
pub mod publish;
pub mod resolve;
pub mod version;

use miette::{IntoDiagnostic, Result};
use modhub_core::{RegistryConfig, RegistryError};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Registry settings shared by every command. Flags override `MODHUB_*`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Local module store
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// HTTP object store consulted after the local store
    #[arg(long = "registry", global = true, value_name = "URL")]
    pub registry_url: Option<String>,

    /// Pick the newest version without checking the requested range
    #[arg(long, global = true)]
    pub optimistic: bool,
}

impl RegistryArgs {
    pub fn config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::from_env();
        if let Some(store) = &self.store {
            config = config.with_store(store);
        }
        if self.registry_url.is_some() {
            config = config.with_registry_url(self.registry_url.clone());
        }
        if self.optimistic {
            config = config.with_optimistic(true);
        }
        config
    }
}

/// Error body of a failed command's JSON output.
#[derive(Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&RegistryError> for ErrorInfo {
    fn from(err: &RegistryError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Resolve an optional path argument against the working directory.
pub fn in_cwd(cwd: &Path, path: Option<PathBuf>) -> PathBuf {
    match path {
        Some(path) if path.is_absolute() => path,
        Some(path) => cwd.join(path),
        None => cwd.to_path_buf(),
    }
}

/// Drive one async command to completion.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    Ok(runtime.block_on(future))
}

/// Print a JSON document to stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{text}");
    Ok(())
}

/// Report a registry error and exit non-zero.
///
/// With `--json` the error is printed as `{"ok": false, "error": {...}}`;
/// otherwise it becomes a diagnostic carrying the error code.
pub fn fail(err: &RegistryError, json: bool) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct Failed {
            ok: bool,
            error: ErrorInfo,
        }
        print_json(&Failed {
            ok: false,
            error: err.into(),
        })?;
        std::process::exit(1);
    }
    Err(miette::miette!(code = err.code(), "{err}"))
}
