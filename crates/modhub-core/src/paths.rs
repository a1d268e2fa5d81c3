use crate::version::SCHEMA_VERSION;
use std::path::PathBuf;

/// Get the default module store directory.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_DATA_HOME/modhub/v{N}/store` or `~/.local/share/modhub/v{N}/store`
/// - macOS: `~/Library/Application Support/modhub/v{N}/store`
/// - Windows: `%APPDATA%\modhub\v{N}\store`
#[must_use]
pub fn store_dir() -> PathBuf {
    let base = dirs_next::data_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".modhub"),
                |p| p.join(".local").join("share").join("modhub"),
            )
        },
        |p| p.join("modhub"),
    );

    base.join(format!("v{SCHEMA_VERSION}")).join("store")
}
