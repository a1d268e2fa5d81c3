#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Module registry core: version resolution, storage, archives and dumping.

pub mod archive;
pub mod barrier;
pub mod config;
pub mod context;
pub mod database;
pub mod dumper;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod strategy;
pub mod version;

pub use archive::{Archive, ModuleInstance, PathFilter, RemoteInstance};
pub use barrier::{join_first_error, join_settled, Barrier, Signal};
pub use config::RegistryConfig;
pub use context::{Context, ContextKind, Repository};
pub use database::Database;
pub use dumper::{DumpDriver, DumpSummary, Dumper, FsDumpDriver};
pub use error::{codes, RegistryError, VersionConflict};
pub use manifest::{Dependencies, Manifest};
pub use registry::{HostManifest, HostModule, InstallSummary, Registry};
pub use resolver::{DependencyNode, DependencyTree, Resolver};
pub use storage::{Driver, Storage, TagCache};
pub use strategy::{OptimisticStrategy, ResolveStrategy, SemverStrategy};
pub use version::VERSION;
