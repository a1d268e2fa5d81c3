//! Version resolution strategies.
//!
//! A strategy maps (known versions, requested spec) to one concrete version.

use crate::database::Database;
use crate::error::RegistryError;
use semver::{Version, VersionReq};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maps a requested spec to one of a database's versions.
pub trait ResolveStrategy: Send + Sync + fmt::Debug {
    /// Returns the chosen version identifier exactly as the database stores
    /// it, or `None` when nothing satisfies `spec`.
    ///
    /// # Errors
    /// Returns an error if `spec` is not a valid range.
    fn resolve(&self, database: &Database, spec: &str) -> Result<Option<String>, RegistryError>;
}

/// Highest version satisfying a semver range.
///
/// # Rules
/// - An exact version matches only itself (after cleaning, so `v1.0.0` == `1.0.0`)
/// - A range picks the highest satisfying version; prereleases only match
///   ranges that name a prerelease
/// - `*`, `x`, `1.x`, `1.2.*` wildcards, hyphen ranges and `||` alternatives
///   are supported
#[derive(Debug, Default, Clone, Copy)]
pub struct SemverStrategy;

impl ResolveStrategy for SemverStrategy {
    fn resolve(&self, database: &Database, spec: &str) -> Result<Option<String>, RegistryError> {
        let spec = spec.trim();
        let candidates = sorted_candidates(database);

        if let Some(exact) = clean_version(spec) {
            return Ok(candidates
                .into_iter()
                .find(|(_, v)| *v == exact)
                .map(|(raw, _)| raw.to_string()));
        }

        let reqs = parse_alternatives(spec)?;
        Ok(candidates
            .into_iter()
            .find(|(_, v)| reqs.iter().any(|req| req.matches(v)))
            .map(|(raw, _)| raw.to_string()))
    }
}

/// Falls back to the spec itself whenever [`SemverStrategy`] cannot resolve it.
///
/// This is a deliberately permissive mode: an invalid or unsatisfiable range
/// is passed through as if it were the concrete version.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimisticStrategy {
    inner: SemverStrategy,
}

impl ResolveStrategy for OptimisticStrategy {
    fn resolve(&self, database: &Database, spec: &str) -> Result<Option<String>, RegistryError> {
        match self.inner.resolve(database, spec) {
            Ok(Some(version)) => Ok(Some(version)),
            Ok(None) => {
                debug!(module = %database.name, spec, "No satisfying version, using spec verbatim");
                Ok(Some(spec.to_string()))
            }
            Err(e) => {
                debug!(module = %database.name, spec, error = %e, "Unresolvable spec, using it verbatim");
                Ok(Some(spec.to_string()))
            }
        }
    }
}

/// Strategy selected by configuration.
#[must_use]
pub fn strategy_for(optimistic: bool) -> Arc<dyn ResolveStrategy> {
    if optimistic {
        Arc::new(OptimisticStrategy::default())
    } else {
        Arc::new(SemverStrategy)
    }
}

/// Parse a version, tolerating a leading `v`/`=` and surrounding whitespace.
#[must_use]
pub fn clean_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('=')
        .unwrap_or(trimmed)
        .trim_start();
    let trimmed = trimmed
        .strip_prefix(['v', 'V'])
        .unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// Database versions that parse as semver, highest first.
fn sorted_candidates(database: &Database) -> Vec<(&str, Version)> {
    let mut parsed: Vec<(&str, Version)> = database
        .versions
        .keys()
        .filter_map(|raw| clean_version(raw).map(|v| (raw.as_str(), v)))
        .collect();
    parsed.sort_by(|a, b| b.1.cmp(&a.1));
    parsed
}

/// Parse `a || b || c` into its alternatives. A lone spec is one alternative.
fn parse_alternatives(spec: &str) -> Result<Vec<VersionReq>, RegistryError> {
    if !spec.contains("||") {
        return Ok(vec![parse_range(spec)?]);
    }

    // Invalid alternatives are skipped as long as one remains
    let reqs: Vec<VersionReq> = spec
        .split("||")
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .filter_map(|alt| parse_range(alt).ok())
        .collect();

    if reqs.is_empty() {
        return Err(RegistryError::invalid_spec(spec, "no valid alternatives"));
    }
    Ok(reqs)
}

/// Parse a single range.
///
/// Handles:
/// - Standard semver ranges: ^1.0.0, ~1.0.0, >=1.0.0, etc.
/// - Hyphen ranges: 1.0.0 - 2.0.0
/// - X-ranges: 1.x, 1.0.x, *
/// - Space-separated comparators: >= 2.1.2 < 3.0.0
fn parse_range(range: &str) -> Result<VersionReq, RegistryError> {
    let range = range.trim();
    let invalid = |e: semver::Error| RegistryError::invalid_spec(range, e.to_string());

    if range.is_empty() {
        return Err(RegistryError::invalid_spec(range, "empty version range"));
    }

    if let Some((start, end)) = parse_hyphen_range(range) {
        return VersionReq::parse(&format!(">={start}, <={end}")).map_err(invalid);
    }

    if range.contains(['x', 'X', '*']) {
        return VersionReq::parse(&convert_x_range(range)?).map_err(invalid);
    }

    VersionReq::parse(&convert_space_separated_comparators(range)).map_err(invalid)
}

fn parse_hyphen_range(range: &str) -> Option<(&str, &str)> {
    let (start, end) = range.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    (!start.is_empty() && !end.is_empty()).then_some((start, end))
}

/// `>= 2.1.2 < 3.0.0` -> `>=2.1.2, <3.0.0`.
fn convert_space_separated_comparators(range: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.chars().any(|c| c.is_ascii_digit()) {
            comparators.push(format!("{pending_op}{token}"));
            pending_op.clear();
        } else {
            // Operator separated from its version by whitespace
            pending_op.push_str(token);
        }
    }

    if !pending_op.is_empty() {
        comparators.push(pending_op);
    }
    comparators.join(", ")
}

fn convert_x_range(range: &str) -> Result<String, RegistryError> {
    if matches!(range, "*" | "x" | "X") {
        return Ok(">=0.0.0".to_string());
    }

    let bump = |n: u64| {
        n.checked_add(1)
            .ok_or_else(|| RegistryError::invalid_spec(range, "version component overflows"))
    };
    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, "x" | "X" | "*"] | [major, "x" | "X" | "*", "x" | "X" | "*"] => {
            if let Ok(m) = major.parse::<u64>() {
                return Ok(format!(">={m}.0.0, <{}.0.0", bump(m)?));
            }
        }
        [major, minor, "x" | "X" | "*"] => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return Ok(format!(">={m}.{n}.0, <{m}.{}.0", bump(n)?));
            }
        }
        _ => {}
    }

    Ok(range.replace(['x', 'X'], "0"))
}
