//! End-to-end tests for `Registry::install` and the resolver.
//!
//! A mock server stands in for the GitHub tag/tarball/raw endpoints and for
//! an HTTP object store, so no test touches the network.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use modhub_core::{codes, Dependencies, HostManifest, HostModule, Registry, RegistryConfig, TagCache};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tar::Builder;
use tempfile::TempDir;

#[derive(Clone)]
struct Mock {
    tag_requests: Arc<AtomicUsize>,
    /// Directory served under `/store/`.
    store: PathBuf,
}

/// Gzipped tarball laid out like a GitHub repository snapshot.
fn create_repo_tarball(owner: &str, repo: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let root = format!("{owner}-{repo}-0a1b2c3");
    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(format!("{root}/{path}")).unwrap();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, contents.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

fn json_response(body: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle_tags(
    Path((owner, repo)): Path<(String, String)>,
    State(mock): State<Mock>,
) -> Response {
    mock.tag_requests.fetch_add(1, Ordering::SeqCst);
    match (owner.as_str(), repo.as_str()) {
        ("acme", "b") => json_response(serde_json::json!([
            {"name": "nightly"},
            {"name": "v2.1.0"},
            {"name": "v2.0.0"},
            {"name": "v1.0.0"}
        ])),
        ("acme", "c") => json_response(serde_json::json!([{"name": "v0.3.0"}])),
        ("acme", "hops") => json_response(serde_json::json!([{"name": "v1.0.0"}])),
        ("limited", _) => (
            StatusCode::FORBIDDEN,
            [
                ("x-ratelimit-remaining", "0"),
                ("x-ratelimit-reset", "1700000000"),
            ],
            "API rate limit exceeded",
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

fn redirect(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// The API answers every tarball request with a redirect to the archive host.
async fn handle_tarball(Path((owner, repo, tag)): Path<(String, String, String)>) -> Response {
    redirect(format!("/codeload/{owner}/{repo}/{tag}"))
}

async fn handle_codeload(Path((owner, repo, tag)): Path<(String, String, String)>) -> Response {
    let files: &[(&str, &str)] = match (owner.as_str(), repo.as_str(), tag.as_str()) {
        ("acme", "b", "v2.1.0") => &[
            ("README.md", "# b"),
            ("src/lib.mh", "b 2.1.0"),
            ("b/extra.mh", "extra"),
            ("test/lib_test.mh", "test"),
        ],
        ("acme", "b", "v2.0.0") => &[("src/lib.mh", "b 2.0.0")],
        ("acme", "c", "v0.3.0") => &[("src/lib.mh", "c 0.3.0")],
        // A second hop, to an archive that does exist
        ("acme", "hops", _) => return redirect("/codeload/acme/b/v2.0.0".to_string()),
        _ => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/gzip")],
        Body::from(create_repo_tarball(&owner, &repo, files)),
    )
        .into_response()
}

async fn handle_raw_manifest(Path((owner, repo, tag)): Path<(String, String, String)>) -> Response {
    match (owner.as_str(), repo.as_str(), tag.as_str()) {
        // acme/b publishes no manifest at all
        ("acme", "c", "v0.3.0") => json_response(serde_json::json!({
            "name": "c",
            "dependencies": { "b": "github://acme/b#~2.1.0" }
        })),
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn handle_store(Path(key): Path<String>, State(mock): State<Mock>) -> Response {
    match std::fs::read(mock.store.join(key.trim_start_matches('/'))) {
        Ok(bytes) => (StatusCode::OK, Body::from(bytes)).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

struct Server {
    base_url: String,
    tag_requests: Arc<AtomicUsize>,
}

/// Start the mock on an ephemeral port. `store` is served under `/store/`.
async fn start_mock(store: PathBuf) -> Server {
    let mock = Mock {
        tag_requests: Arc::new(AtomicUsize::new(0)),
        store,
    };
    let tag_requests = Arc::clone(&mock.tag_requests);

    let app = Router::new()
        .route("/api/repos/:owner/:repo/tags", get(handle_tags))
        .route("/api/repos/:owner/:repo/tarball/:tag", get(handle_tarball))
        .route("/codeload/:owner/:repo/:tag", get(handle_codeload))
        .route("/raw/:owner/:repo/:tag/modhub.json", get(handle_raw_manifest))
        .route("/store/*key", get(handle_store))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base_url: format!("http://{addr}"),
        tag_requests,
    }
}

fn config(server: &Server, store: &std::path::Path) -> RegistryConfig {
    RegistryConfig::default()
        .with_store(store)
        .with_github(
            format!("{}/api/", server.base_url),
            format!("{}/raw/", server.base_url),
        )
}

fn deps(pairs: &[(&str, &str)]) -> Dependencies {
    pairs
        .iter()
        .map(|(name, spec)| ((*name).to_string(), (*spec).to_string()))
        .collect()
}

/// Publish a module directory holding `src/<name>.mh`.
async fn publish(registry: &Registry, name: &str, version: &str, dependencies: &[(&str, &str)]) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src").join(format!("{name}.mh")),
        format!("{name} {version}"),
    )
    .unwrap();
    registry
        .publish(dir.path(), name, version, deps(dependencies))
        .await
        .unwrap();
}

fn host(root: &std::path::Path, dependencies: &[(&str, &str)]) -> HostManifest {
    HostManifest::new(
        root,
        vec![HostModule {
            name: "app".to_string(),
            dependencies: deps(dependencies),
        }],
    )
}

#[tokio::test]
async fn test_install_local_and_repository_modules() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    publish(&registry, "a", "1.0.0", &[]).await;
    publish(&registry, "a", "1.2.0", &[("b", "github://acme/b#^2.0.0")]).await;
    publish(&registry, "a", "2.0.0", &[]).await;

    let summary = registry
        .install(&host(project.path(), &[("a", "^1.0.0")]))
        .await
        .unwrap();

    let tree = &summary.trees[0];
    let a = &tree.dependencies["a"];
    assert_eq!(a.context.version(), "1.2.0");
    let b = &a.dependencies["b"];
    assert_eq!(b.context.version(), "2.1.0");
    assert_eq!(b.context.location(), Some("v2.1.0"));
    assert!(b.context.is_remote());
    // No manifest upstream means no dependencies
    assert!(b.dependencies.is_empty());

    let modules = project.path().join("modules");
    assert_eq!(
        std::fs::read_to_string(modules.join("a/src/a.mh")).unwrap(),
        "a 1.2.0"
    );
    assert_eq!(
        std::fs::read_to_string(modules.join("b/src/lib.mh")).unwrap(),
        "b 2.1.0"
    );
    assert!(modules.join("b/b/extra.mh").exists());
    assert!(!modules.join("b/README.md").exists());
    assert!(!modules.join("b/test").exists());
    assert_eq!(summary.dump.dumped.len(), 2);

    registry.settle().await;
}

#[tokio::test]
async fn test_repository_manifest_dependencies_are_followed() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    let summary = registry
        .install(&host(project.path(), &[("c", "github://acme/c")]))
        .await
        .unwrap();

    let c = &summary.trees[0].dependencies["c"];
    assert_eq!(c.context.version(), "0.3.0");
    assert_eq!(c.dependencies["b"].context.version(), "2.1.0");
    assert!(project.path().join("modules/c/src/lib.mh").exists());
    assert!(project.path().join("modules/b/src/lib.mh").exists());
}

#[tokio::test]
async fn test_tag_cache_shared_across_registries() {
    let store = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let tags = TagCache::new();

    for _ in 0..2 {
        let registry = Registry::from_config(config(&server, store.path()), tags.clone()).unwrap();
        let node = registry
            .resolver()
            .resolve_dependency("b", "github://acme/b#^2.0.0")
            .await
            .unwrap();
        assert_eq!(node.context.version(), "2.1.0");
    }

    assert_eq!(server.tag_requests.load(Ordering::SeqCst), 1);
    assert_eq!(tags.len().await, 1);
}

#[tokio::test]
async fn test_non_semver_tags_are_not_candidates() {
    let store = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    let err = registry
        .resolver()
        .resolve_dependency("b", "github://acme/b#^3.0.0")
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::MODHUB_VERSION_NOT_FOUND);
    let message = err.to_string();
    assert!(message.contains("2.1.0"));
    assert!(!message.contains("nightly"));
}

#[tokio::test]
async fn test_rate_limited_listing() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    let err = registry
        .install(&host(project.path(), &[("x", "github://limited/x#^1.0.0")]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::MODHUB_RATE_LIMITED);
    assert!(err.to_string().contains("MODHUB_GITHUB_TOKEN"));

    registry.settle().await;
    assert!(!project.path().join("modules/x").exists());
}

#[tokio::test]
async fn test_unknown_repository() {
    let store = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    let err = registry
        .resolver()
        .resolve_dependency("nope", "github://acme/nope")
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::MODHUB_DATABASE_NOT_FOUND);
}

#[tokio::test]
async fn test_conflict_within_one_tree_installs_nothing() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    publish(&registry, "c", "1.0.0", &[]).await;
    publish(&registry, "c", "2.0.0", &[]).await;
    publish(&registry, "d", "1.0.0", &[("c", "^2.0.0")]).await;
    publish(&registry, "a", "1.0.0", &[("c", "=1.0.0"), ("d", "^1.0.0")]).await;

    let err = registry
        .install(&host(project.path(), &[("a", "^1.0.0")]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::MODHUB_CONFLICT);
    let message = err.to_string();
    assert!(message.contains("1.0.0"));
    assert!(message.contains("2.0.0"));

    registry.settle().await;
    let modules = project.path().join("modules");
    assert!(!modules.join("a").exists());
    assert!(!modules.join("c").exists());
}

#[tokio::test]
async fn test_conflict_across_host_dependencies() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    publish(&registry, "c", "1.0.0", &[]).await;
    publish(&registry, "c", "2.0.0", &[]).await;
    publish(&registry, "a", "1.0.0", &[("c", "=1.0.0")]).await;
    publish(&registry, "d", "1.0.0", &[("c", "^2.0.0")]).await;

    // Each tree is consistent on its own; together they share modules/c
    let host = HostManifest::new(
        project.path(),
        vec![
            HostModule {
                name: "web".to_string(),
                dependencies: deps(&[("a", "*")]),
            },
            HostModule {
                name: "worker".to_string(),
                dependencies: deps(&[("d", "*")]),
            },
        ],
    );
    let err = registry.install(&host).await.unwrap_err();
    assert_eq!(err.code(), codes::MODHUB_CONFLICT);
    let message = err.to_string();
    assert!(message.contains("c (1.0.0, 2.0.0)") || message.contains("c (2.0.0, 1.0.0)"));

    registry.settle().await;
    let modules = project.path().join("modules");
    for name in ["a", "c", "d"] {
        assert!(!modules.join(name).exists(), "{name} was dumped");
    }

    // Side by side destinations have no shared path to fight over
    let versioned = Registry::from_config(
        config(&server, store.path()).with_versioned(true),
        TagCache::new(),
    )
    .unwrap();
    let summary = versioned.install(&host).await.unwrap();
    assert_eq!(summary.dump.dumped.len(), 4);
    assert!(modules.join("c@1.0.0").is_dir());
    assert!(modules.join("c@2.0.0").is_dir());
}

#[tokio::test]
async fn test_cycle_installs_each_module_once() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    publish(&registry, "a", "1.0.0", &[("b", "^1.0.0")]).await;
    publish(&registry, "b", "1.0.0", &[("a", "^1.0.0")]).await;

    let summary = registry
        .install(&host(project.path(), &[("a", "^1.0.0")]))
        .await
        .unwrap();

    let a = &summary.trees[0].dependencies["a"];
    let b = &a.dependencies["b"];
    let back = &b.dependencies["a"];
    assert!(!a.circular);
    assert!(!b.circular);
    assert!(back.circular);
    assert!(back.dependencies.is_empty());

    assert_eq!(summary.dump.dumped.len(), 2);
    assert!(project.path().join("modules/a/src/a.mh").exists());
    assert!(project.path().join("modules/b/src/b.mh").exists());
}

#[tokio::test]
async fn test_second_install_skips_present_modules() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    publish(&registry, "a", "1.0.0", &[]).await;
    let manifest = host(project.path(), &[("a", "^1.0.0")]);

    let first = registry.install(&manifest).await.unwrap();
    assert_eq!(first.dump.dumped.len(), 1);

    let second = registry.install(&manifest).await.unwrap();
    assert!(second.dump.dumped.is_empty());
    assert_eq!(second.dump.skipped, vec!["a@1.0.0".to_string()]);
}

#[tokio::test]
async fn test_http_object_store_fallback() {
    // Objects published into one store are served over HTTP to a registry
    // whose own local store is empty
    let published = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(published.path().to_path_buf()).await;

    let publisher = Registry::from_config(config(&server, published.path()), TagCache::new()).unwrap();
    publish(&publisher, "a", "1.0.0", &[]).await;
    publish(&publisher, "a", "1.1.0", &[]).await;

    let consumer_config = config(&server, empty.path())
        .with_registry_url(Some(format!("{}/store/", server.base_url)))
        .with_versioned(true);
    let consumer = Registry::from_config(consumer_config, TagCache::new()).unwrap();

    let summary = consumer
        .install(&host(project.path(), &[("a", "~1.0.0")]))
        .await
        .unwrap();
    assert_eq!(summary.trees[0].dependencies["a"].context.version(), "1.0.0");
    assert_eq!(
        std::fs::read_to_string(project.path().join("modules/a@1.0.0/src/a.mh")).unwrap(),
        "a 1.0.0"
    );

    // The HTTP store is read-only; publishing lands in the local store only
    publish(&consumer, "z", "0.1.0", &[]).await;
    assert!(empty.path().join("z/db.json").exists());
    assert!(!published.path().join("z").exists());
}

#[tokio::test]
async fn test_host_manifest_file_install() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    publish(&registry, "a", "1.0.0", &[]).await;
    std::fs::write(
        project.path().join("modhub.json"),
        serde_json::json!({
            "modules": [
                {"name": "web", "dependencies": {"a": "^1.0.0"}},
                {"name": "worker", "dependencies": {"b": "github://acme/b#=2.0.0"}}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let manifest = HostManifest::read_from(project.path()).unwrap();
    let summary = registry.install(&manifest).await.unwrap();

    let names: BTreeMap<&str, &str> = summary
        .trees
        .iter()
        .flat_map(|tree| tree.dependencies.values())
        .map(|node| (node.context.name(), node.context.version()))
        .collect();
    assert_eq!(names.get("a"), Some(&"1.0.0"));
    assert_eq!(names.get("b"), Some(&"2.0.0"));
    assert!(project.path().join("modules/a").exists());
}

#[tokio::test]
async fn test_resolve_mixed_host_dependencies() {
    let store = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    for version in ["0.9.0", "1.0.0", "1.2.0"] {
        publish(&registry, "A", version, &[]).await;
    }

    let tree = registry
        .resolver()
        .resolve(
            "app",
            &deps(&[("A", "^1.0.0"), ("B", "github://acme/b#^2.0.0")]),
        )
        .await
        .unwrap();

    assert_eq!(tree.dependencies["A"].context.version(), "1.2.0");
    assert_eq!(tree.dependencies["B"].context.version(), "2.1.0");
    assert_eq!(tree.dependencies["B"].context.name(), "B");
    assert_eq!(tree.walk().count(), 2);
}

#[tokio::test]
async fn test_tarball_redirect_chain_is_refused() {
    let store = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let server = start_mock(store.path().to_path_buf()).await;
    let registry = Registry::from_config(config(&server, store.path()), TagCache::new()).unwrap();

    let err = registry
        .install(&host(project.path(), &[("hops", "github://acme/hops#^1.0.0")]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::MODHUB_TRANSPORT);

    registry.settle().await;
    assert!(!project.path().join("modules/hops").exists());
}
