//! `modhub resolve`: print the dependency trees of a host manifest.

use super::{block_on, fail, print_json, RegistryArgs};
use miette::Result;
use modhub_core::{DependencyNode, DependencyTree, HostManifest, Registry, RegistryError, TagCache};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Serialize)]
struct ResolveResult {
    ok: bool,
    trees: Vec<DependencyTree>,
}

pub fn run(args: &RegistryArgs, manifest: &Path, json: bool) -> Result<()> {
    let config = args.config();
    let outcome = block_on(async move {
        let host = HostManifest::read_from(manifest)?;
        let registry = Registry::from_config(config, TagCache::new())?;
        // One resolver, so every module shares the session cache
        let resolver = registry.resolver();
        let mut trees = Vec::with_capacity(host.modules.len());
        for module in &host.modules {
            trees.push(resolver.resolve(&module.name, &module.dependencies).await?);
        }
        Ok::<_, RegistryError>(trees)
    })?;

    let trees = match outcome {
        Ok(trees) => trees,
        Err(err) => return fail(&err, json),
    };

    if json {
        return print_json(&ResolveResult { ok: true, trees });
    }
    for tree in &trees {
        print!("{}", render_tree(tree));
    }
    Ok(())
}

/// Indented text rendering, one line per node.
fn render_tree(tree: &DependencyTree) -> String {
    let mut out = format!("{}\n", tree.name);
    for node in tree.dependencies.values() {
        render_node(&mut out, node, 1);
    }
    out
}

fn render_node(out: &mut String, node: &DependencyNode, depth: usize) {
    let _ = write!(out, "{}{} ({})", "  ".repeat(depth), node.context, node.requested);
    if node.circular {
        out.push_str(" [circular]");
    }
    out.push('\n');
    for child in node.dependencies.values() {
        render_node(out, child, depth + 1);
    }
}
