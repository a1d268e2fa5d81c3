//! Registry error types.

use crate::storage::http::GITHUB_DRIVER;
use std::fmt;
use std::io;
use thiserror::Error;

/// Registry error codes.
pub mod codes {
    pub const MODHUB_INVALID_DATA: &str = "MODHUB_INVALID_DATA";
    pub const MODHUB_INVALID_SPEC: &str = "MODHUB_INVALID_SPEC";
    pub const MODHUB_DATABASE_NOT_FOUND: &str = "MODHUB_DATABASE_NOT_FOUND";
    pub const MODHUB_MANIFEST_NOT_FOUND: &str = "MODHUB_MANIFEST_NOT_FOUND";
    pub const MODHUB_ARCHIVE_NOT_FOUND: &str = "MODHUB_ARCHIVE_NOT_FOUND";
    pub const MODHUB_VERSION_NOT_FOUND: &str = "MODHUB_VERSION_NOT_FOUND";
    pub const MODHUB_CONFLICT: &str = "MODHUB_CONFLICT";
    pub const MODHUB_TRANSPORT: &str = "MODHUB_TRANSPORT";
    pub const MODHUB_RATE_LIMITED: &str = "MODHUB_RATE_LIMITED";
    pub const MODHUB_READ_ONLY: &str = "MODHUB_READ_ONLY";
    pub const MODHUB_WRITE_FAILED: &str = "MODHUB_WRITE_FAILED";
    pub const MODHUB_EXTRACT_FAILED: &str = "MODHUB_EXTRACT_FAILED";
    pub const MODHUB_IO: &str = "MODHUB_IO";
    pub const MODHUB_OTHER: &str = "MODHUB_OTHER";
}

/// One module name resolved to more than one version within a single dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    pub name: String,
    pub versions: Vec<String>,
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.versions.join(", "))
    }
}

/// Registry error.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Undecodable {what}: {source}")]
    InvalidData {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid dependency spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Module database not found: {name}")]
    DatabaseNotFound { name: String },

    #[error("Manifest not found: {module}")]
    ManifestNotFound { module: String },

    #[error("Archive not found: {module}")]
    ArchiveNotFound { module: String },

    #[error("No version of {name} satisfies '{spec}' (available: {})", list_or_none(.available))]
    VersionNotFound {
        name: String,
        spec: String,
        available: Vec<String>,
    },

    #[error("Conflicting module versions: {}", join_conflicts(.conflicts))]
    Conflict { conflicts: Vec<VersionConflict> },

    #[error("{message}")]
    Transport {
        message: String,
        status: Option<u16>,
        rate_limit_remaining: Option<u64>,
        rate_limit_reset: Option<u64>,
    },

    #[error(
        "Rate limit exhausted on '{driver}': {message}{}{}",
        token_hint(.driver),
        reset_hint(.reset)
    )]
    RateLimited {
        driver: String,
        message: String,
        reset: Option<u64>,
    },

    #[error("Driver '{driver}' is read-only")]
    ReadOnly { driver: String },

    #[error("Write failed on {} driver(s): {}", .errors.len(), .errors.join("; "))]
    WriteFailed { errors: Vec<String> },

    #[error("Extraction failed: {0}")]
    Extract(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn join_conflicts(conflicts: &[VersionConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn token_hint(driver: &str) -> &'static str {
    if driver == GITHUB_DRIVER {
        ". Set MODHUB_GITHUB_TOKEN to an access token to raise the limit"
    } else {
        ""
    }
}

fn reset_hint(reset: &Option<u64>) -> String {
    match reset {
        Some(at) => format!(" (limit resets at unix time {at})"),
        None => String::new(),
    }
}

impl RegistryError {
    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidData { .. } => codes::MODHUB_INVALID_DATA,
            Self::InvalidSpec { .. } => codes::MODHUB_INVALID_SPEC,
            Self::DatabaseNotFound { .. } => codes::MODHUB_DATABASE_NOT_FOUND,
            Self::ManifestNotFound { .. } => codes::MODHUB_MANIFEST_NOT_FOUND,
            Self::ArchiveNotFound { .. } => codes::MODHUB_ARCHIVE_NOT_FOUND,
            Self::VersionNotFound { .. } => codes::MODHUB_VERSION_NOT_FOUND,
            Self::Conflict { .. } => codes::MODHUB_CONFLICT,
            Self::Transport { .. } => codes::MODHUB_TRANSPORT,
            Self::RateLimited { .. } => codes::MODHUB_RATE_LIMITED,
            Self::ReadOnly { .. } => codes::MODHUB_READ_ONLY,
            Self::WriteFailed { .. } => codes::MODHUB_WRITE_FAILED,
            Self::Extract(_) => codes::MODHUB_EXTRACT_FAILED,
            Self::Io(_) => codes::MODHUB_IO,
            Self::Other(_) => codes::MODHUB_OTHER,
        }
    }

    /// Create an undecodable-data error naming the offending object.
    pub fn invalid_data(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidData {
            what: what.into(),
            source,
        }
    }

    /// Create an invalid spec error.
    pub fn invalid_spec(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Create a plain transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            rate_limit_remaining: None,
            rate_limit_reset: None,
        }
    }

    /// Create an extraction error.
    pub fn extract(message: impl Into<String>) -> Self {
        Self::Extract(message.into())
    }

    /// Remaining request allowance reported by the transport, if any.
    #[must_use]
    pub fn rate_limit_remaining(&self) -> Option<u64> {
        match self {
            Self::Transport {
                rate_limit_remaining,
                ..
            } => *rate_limit_remaining,
            _ => None,
        }
    }

    /// Turn an exhausted-allowance transport error from `driver` into `RateLimited`.
    ///
    /// Every other error is returned unchanged.
    #[must_use]
    pub fn classify_rate_limit(self, driver: &str) -> Self {
        match self {
            Self::Transport {
                message,
                rate_limit_remaining: Some(0),
                rate_limit_reset,
                ..
            } => Self::RateLimited {
                driver: driver.to_string(),
                message,
                reset: rate_limit_reset,
            },
            other => other,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("Request timed out: {e}")
        } else if e.is_connect() {
            format!("Connection failed: {e}")
        } else {
            e.to_string()
        };

        Self::Transport {
            message,
            status: e.status().map(|s| s.as_u16()),
            rate_limit_remaining: None,
            rate_limit_reset: None,
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_data("JSON", e)
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Other(format!("Background task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = RegistryError::invalid_spec("github://", "missing repository");
        assert_eq!(err.code(), codes::MODHUB_INVALID_SPEC);
        assert!(err.to_string().contains("github://"));
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::MODHUB_INVALID_DATA,
            codes::MODHUB_INVALID_SPEC,
            codes::MODHUB_DATABASE_NOT_FOUND,
            codes::MODHUB_MANIFEST_NOT_FOUND,
            codes::MODHUB_ARCHIVE_NOT_FOUND,
            codes::MODHUB_VERSION_NOT_FOUND,
            codes::MODHUB_CONFLICT,
            codes::MODHUB_TRANSPORT,
            codes::MODHUB_RATE_LIMITED,
            codes::MODHUB_READ_ONLY,
            codes::MODHUB_WRITE_FAILED,
            codes::MODHUB_EXTRACT_FAILED,
            codes::MODHUB_IO,
            codes::MODHUB_OTHER,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_version_not_found_lists_available() {
        let err = RegistryError::VersionNotFound {
            name: "a".to_string(),
            spec: "^3.0.0".to_string(),
            available: vec!["1.0.0".to_string(), "2.0.0".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("^3.0.0"));
        assert!(msg.contains("1.0.0, 2.0.0"));
    }

    #[test]
    fn test_conflict_lists_every_module() {
        let err = RegistryError::Conflict {
            conflicts: vec![
                VersionConflict {
                    name: "x".to_string(),
                    versions: vec!["1.0.0".to_string(), "2.0.0".to_string()],
                },
                VersionConflict {
                    name: "y".to_string(),
                    versions: vec!["0.1.0".to_string(), "0.2.0".to_string()],
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Conflicting module versions: x (1.0.0, 2.0.0); y (0.1.0, 0.2.0)"
        );
    }

    #[test]
    fn test_classify_rate_limit() {
        let exhausted = RegistryError::Transport {
            message: "HTTP 403".to_string(),
            status: Some(403),
            rate_limit_remaining: Some(0),
            rate_limit_reset: Some(42),
        };
        let err = exhausted.classify_rate_limit("github");
        assert_eq!(err.code(), codes::MODHUB_RATE_LIMITED);

        let forbidden = RegistryError::Transport {
            message: "HTTP 403".to_string(),
            status: Some(403),
            rate_limit_remaining: Some(12),
            rate_limit_reset: None,
        };
        assert_eq!(forbidden.classify_rate_limit("github").code(), codes::MODHUB_TRANSPORT);
        assert_eq!(
            RegistryError::transport("offline").classify_rate_limit("github").code(),
            codes::MODHUB_TRANSPORT
        );
    }

    #[test]
    fn test_rate_limited_mentions_token() {
        let err = RegistryError::RateLimited {
            driver: "github".to_string(),
            message: "GET /repos/acme/b/tags".to_string(),
            reset: Some(1_700_000_000),
        };
        let msg = err.to_string();
        assert!(msg.contains("'github'"));
        assert!(msg.contains("MODHUB_GITHUB_TOKEN"));
        assert!(msg.contains("1700000000"));
    }

    #[test]
    fn test_rate_limited_registry_has_no_token_hint() {
        let exhausted = RegistryError::Transport {
            message: "GET https://modules.example.com/a/db.json returned status 429".to_string(),
            status: Some(429),
            rate_limit_remaining: Some(0),
            rate_limit_reset: None,
        };
        let msg = exhausted.classify_rate_limit("registry").to_string();
        assert!(msg.starts_with("Rate limit exhausted on 'registry'"));
        assert!(!msg.contains("MODHUB_GITHUB_TOKEN"));
    }
}
