use miette::Result;
use modhub_core::version::{version_string, SCHEMA_VERSION};
use modhub_core::VERSION;
use serde::Serialize;

#[derive(Serialize)]
struct VersionInfo {
    ok: bool,
    version: &'static str,
    schema_version: u32,
}

/// Run the version command.
pub fn run(json: bool) -> Result<()> {
    if json {
        return super::print_json(&VersionInfo {
            ok: true,
            version: VERSION,
            schema_version: SCHEMA_VERSION,
        });
    }
    println!("{}", version_string());
    Ok(())
}
