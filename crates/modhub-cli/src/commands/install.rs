//! `modhub install`: resolve a host manifest and materialize its modules.

use super::{block_on, fail, print_json, RegistryArgs};
use miette::Result;
use modhub_core::{DependencyTree, HostManifest, Registry, TagCache};
use serde::Serialize;
use std::path::PathBuf;

pub struct InstallOptions {
    pub manifest: PathBuf,
    pub versioned: bool,
    pub modules_dir: Option<String>,
}

#[derive(Serialize)]
struct InstallResult {
    ok: bool,
    destination: PathBuf,
    dumped: Vec<PathBuf>,
    skipped: Vec<String>,
    trees: Vec<DependencyTree>,
}

pub fn run(args: &RegistryArgs, options: InstallOptions, json: bool) -> Result<()> {
    let mut config = args.config().with_versioned(options.versioned);
    if let Some(dir) = options.modules_dir {
        config = config.with_modules_dir(dir);
    }

    let outcome = block_on(async move {
        let host = HostManifest::read_from(&options.manifest)?;
        let registry = Registry::from_config(config, TagCache::new())?;
        let installed = registry.install(&host).await;
        // Jobs that were still running when the first error came back
        registry.settle().await;
        installed
    })?;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(err) => return fail(&err, json),
    };

    if json {
        return print_json(&InstallResult {
            ok: true,
            destination: summary.destination,
            dumped: summary.dump.dumped,
            skipped: summary.dump.skipped,
            trees: summary.trees,
        });
    }

    for path in &summary.dump.dumped {
        println!("+ {}", path.display());
    }
    for name in &summary.dump.skipped {
        println!("= {name} (already installed)");
    }
    println!(
        "{} installed, {} up to date in {}",
        summary.dump.dumped.len(),
        summary.dump.skipped.len(),
        summary.destination.display()
    );
    Ok(())
}

