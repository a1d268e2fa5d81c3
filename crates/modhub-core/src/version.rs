use std::fmt::Write;

/// Crate version, shared by every modhub binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout version of the local store; part of its directory name.
pub const SCHEMA_VERSION: u32 = 1;

/// `modhub X.Y.Z`, plus the commit when the build recorded one.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("modhub {VERSION}");

    if let Some(hash) = option_env!("MODHUB_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}

/// User agent sent with every HTTP request.
#[must_use]
pub fn user_agent() -> String {
    format!("modhub/{VERSION}")
}
