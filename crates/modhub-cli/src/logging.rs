//! Logging initialization for the CLI.
//!
//! Library crates only emit events; the subscriber lives here.

use tracing::Level;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `verbosity` 0 = INFO, 1 = DEBUG, 2+ = TRACE. With `json`, events are
/// written to stderr as one JSON object per line:
///
/// ```json
/// {"timestamp":"...","level":"INFO","target":"modhub_core::registry","fields":{"message":"Installing modules"}}
/// ```
pub fn init(verbosity: u8, json: bool) {
    let level = level_for(verbosity);

    // RUST_LOG wins for everything but our own crates
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for directive in crate_directives(level) {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    // A second init (tests, embedding) keeps the first subscriber
    let _ = if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
}

fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn crate_directives(level: Level) -> Vec<Directive> {
    ["modhub", "modhub_core", "modhub_util"]
        .iter()
        .filter_map(|target| format!("{target}={level}").parse().ok())
        .collect()
}
