//! Recursive directory enumeration with ignore-file filtering.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the per-directory ignore file consulted at the walk root.
pub const IGNORE_FILE: &str = ".modhubignore";

/// Directories that are never enumerated.
const ALWAYS_SKIPPED: &[&str] = &[".git", ".hg", ".svn"];

/// Ignore rules read from an ignore file.
///
/// One glob pattern per line, matched against `/`-separated paths relative
/// to the walk root. Blank lines and `#` comments are skipped. A trailing
/// `/` (or `/**`) excludes a whole directory.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    dirs: Vec<String>,
    patterns: Vec<glob::Pattern>,
}

impl IgnoreRules {
    /// Parse ignore rules from file contents. Invalid globs are dropped.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut rules = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(dir) = line
                .strip_suffix("/**")
                .or_else(|| line.strip_suffix('/'))
            {
                rules.dirs.push(dir.trim_start_matches('/').to_string());
            } else if let Ok(pattern) = glob::Pattern::new(line.trim_start_matches('/')) {
                rules.patterns.push(pattern);
            }
        }

        rules
    }

    /// Load the ignore file under `root`, or empty rules if there is none.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub fn load(root: &Path) -> io::Result<Self> {
        match fs::read_to_string(root.join(IGNORE_FILE)) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Whether a root-relative, `/`-separated path is ignored.
    #[must_use]
    pub fn is_ignored(&self, rel: &str) -> bool {
        let in_dir = self
            .dirs
            .iter()
            .any(|d| rel == d || rel.strip_prefix(d.as_str()).is_some_and(|r| r.starts_with('/')));

        in_dir || self.patterns.iter().any(|p| p.matches(rel))
    }
}

/// Root-relative path with `/` separators on every platform.
#[must_use]
pub fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// List all regular files under `root`, honouring the root's ignore file.
///
/// Returned paths are relative to `root` and sorted for determinism.
/// Symlinks are not followed.
///
/// # Errors
/// Returns an error if the ignore file or a directory cannot be read.
pub fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let rules = IgnoreRules::load(root)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() && ALWAYS_SKIPPED.contains(&name.as_ref()) {
                return false;
            }
            !rules.is_ignored(&relative_slash_path(root, e.path()))
        })
    {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.push(rel.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}
