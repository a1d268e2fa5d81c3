//! `modhub publish` / `modhub unpublish` against the configured store.

use super::{block_on, fail, print_json, RegistryArgs};
use miette::Result;
use modhub_core::manifest::MANIFEST_FILE;
use modhub_core::{Dependencies, Manifest, Registry, RegistryError, TagCache};
use serde::Serialize;
use std::path::PathBuf;

pub struct PublishOptions {
    pub dir: PathBuf,
    pub name: Option<String>,
    pub version: Option<String>,
    /// `name=spec` pairs added on top of the directory's manifest.
    pub deps: Vec<String>,
}

#[derive(Serialize)]
struct PublishResult {
    ok: bool,
    name: String,
    version: String,
}

#[derive(Serialize)]
struct UnpublishResult {
    ok: bool,
    removed: bool,
}

pub fn run(args: &RegistryArgs, options: PublishOptions, json: bool) -> Result<()> {
    let (name, version, dependencies) = match publish_target(&options) {
        Ok(target) => target,
        Err(err) => return fail(&err, json),
    };

    let config = args.config();
    let dir = options.dir;
    let outcome = block_on(async move {
        let registry = Registry::from_config(config, TagCache::new())?;
        registry.publish(&dir, &name, &version, dependencies).await
    })?;

    let ctx = match outcome {
        Ok(ctx) => ctx,
        Err(err) => return fail(&err, json),
    };

    if json {
        return print_json(&PublishResult {
            ok: true,
            name: ctx.name().to_string(),
            version: ctx.version().to_string(),
        });
    }
    println!("published {ctx}");
    Ok(())
}

pub fn unpublish(args: &RegistryArgs, name: &str, version: &str, json: bool) -> Result<()> {
    let config = args.config();
    let outcome = block_on(async move {
        let registry = Registry::from_config(config, TagCache::new())?;
        registry.unpublish(name, version).await
    })?;

    let removed = match outcome {
        Ok(removed) => removed,
        Err(err) => return fail(&err, json),
    };

    if json {
        return print_json(&UnpublishResult { ok: true, removed });
    }
    if removed {
        println!("unpublished {name}@{version}");
    } else {
        println!("{name}@{version} was not published");
    }
    Ok(())
}

/// Name, version and dependencies from the directory's manifest and flags.
fn publish_target(options: &PublishOptions) -> Result<(String, String, Dependencies), RegistryError> {
    let path = options.dir.join(MANIFEST_FILE);
    let manifest = match std::fs::read(&path) {
        Ok(bytes) => Manifest::from_slice(&path.display().to_string(), &bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
        Err(e) => return Err(e.into()),
    };

    let name = options
        .name
        .clone()
        .unwrap_or(manifest.name)
        .trim()
        .to_string();
    let version = options
        .version
        .clone()
        .unwrap_or(manifest.version)
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(RegistryError::invalid_spec("", "no module name given"));
    }
    if version.is_empty() {
        return Err(RegistryError::invalid_spec(name, "no version given"));
    }

    let mut dependencies = manifest.dependencies;
    for dep in &options.deps {
        let (dep_name, spec) = parse_dep(dep)?;
        dependencies.insert(dep_name, spec);
    }
    Ok((name, version, dependencies))
}

fn parse_dep(raw: &str) -> Result<(String, String), RegistryError> {
    match raw.split_once('=') {
        Some((name, spec)) if !name.trim().is_empty() && !spec.trim().is_empty() => {
            Ok((name.trim().to_string(), spec.trim().to_string()))
        }
        _ => Err(RegistryError::invalid_spec(raw, "expected name=spec")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(dir: PathBuf) -> PublishOptions {
        PublishOptions {
            dir,
            name: None,
            version: None,
            deps: Vec::new(),
        }
    }

    #[test]
    fn test_target_from_directory_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "a", "version": "1.2.0", "dependencies": {"b": "^2.0.0"}}"#,
        )
        .unwrap();

        let mut opts = options(dir.path().to_path_buf());
        opts.deps = vec!["c=~1.0.0".to_string()];
        let (name, version, deps) = publish_target(&opts).unwrap();

        assert_eq!(name, "a");
        assert_eq!(version, "1.2.0");
        assert_eq!(deps.get("b").map(String::as_str), Some("^2.0.0"));
        assert_eq!(deps.get("c").map(String::as_str), Some("~1.0.0"));
    }

    #[test]
    fn test_flags_override_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "a", "version": "1.2.0"}"#,
        )
        .unwrap();

        let mut opts = options(dir.path().to_path_buf());
        opts.version = Some("1.3.0".to_string());
        let (name, version, _) = publish_target(&opts).unwrap();
        assert_eq!((name.as_str(), version.as_str()), ("a", "1.3.0"));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let dir = tempdir().unwrap();
        let err = publish_target(&options(dir.path().to_path_buf())).unwrap_err();
        assert_eq!(err.code(), modhub_core::codes::MODHUB_INVALID_SPEC);
    }

    #[test]
    fn test_parse_dep() {
        assert_eq!(
            parse_dep("b=^2.0.0").unwrap(),
            ("b".to_string(), "^2.0.0".to_string())
        );
        assert!(parse_dep("b").is_err());
        assert!(parse_dep("=^2.0.0").is_err());
    }
}
