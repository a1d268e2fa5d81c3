//! Module archives.
//!
//! A published version is stored as a plain tar of its source tree.
//! Repository-hosted versions arrive as a gzipped tarball stream and are
//! unpacked while downloading, keeping only the module's source files.

use crate::error::RegistryError;
use crate::storage::ByteStream;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::StreamExt;
use modhub_util::hash::blake3_bytes;
use modhub_util::walk::{relative_slash_path, walk_files};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, HeaderMode};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Top-level directory holding a repository-hosted module's sources.
pub const SOURCE_DIR: &str = "src";

/// Chunks buffered between the download and the extractor.
const STREAM_BUFFER: usize = 16;

/// Packed source tree of one module version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    bytes: Bytes,
}

impl Archive {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Canonical serialized form, as stored.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// BLAKE3 digest of the serialized form.
    #[must_use]
    pub fn digest(&self) -> String {
        blake3_bytes(&self.bytes)
    }

    /// Pack `dir`, honouring its ignore file.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be walked or a file cannot be read.
    pub async fn load(dir: &Path) -> Result<Self, RegistryError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::pack_dir(&dir)).await?
    }

    /// Blocking variant of [`Archive::load`].
    ///
    /// Entries are sorted with normalized metadata, so packing the same tree
    /// twice gives identical bytes.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be walked or a file cannot be read.
    pub fn pack_dir(dir: &Path) -> Result<Self, RegistryError> {
        let files = walk_files(dir)?;
        let mut builder = Builder::new(Vec::new());
        builder.mode(HeaderMode::Deterministic);

        for rel in &files {
            let name = relative_slash_path(dir, &dir.join(rel));
            builder.append_path_with_name(dir.join(rel), &name)?;
        }

        let bytes = builder.into_inner()?;
        debug!(dir = %dir.display(), files = files.len(), bytes = bytes.len(), "Packed archive");
        Ok(Self::from_bytes(bytes))
    }

    /// Unpack every file into `dest`. Returns the number of files written.
    ///
    /// # Errors
    /// Returns an error if the archive is malformed or a file cannot be written.
    pub async fn extract(&self, dest: &Path) -> Result<usize, RegistryError> {
        let bytes = self.bytes.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut archive = tar::Archive::new(&bytes[..]);
            extract_entries(&mut archive, &dest, None)
        })
        .await?
    }
}

/// Selects which tarball paths belong to a repository-hosted module.
///
/// The tarball's single root directory is dropped. What remains is kept if
/// it lives under [`SOURCE_DIR`] or under a directory named after the module
/// (its last name segment, or its repository name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    prefixes: Vec<String>,
}

impl PathFilter {
    #[must_use]
    pub fn for_module(name: &str, repo: Option<&str>) -> Self {
        let mut prefixes = vec![SOURCE_DIR.to_string()];
        let short = name.rsplit('/').next().unwrap_or(name).trim_start_matches('@');
        for alias in [Some(short), repo].into_iter().flatten() {
            if !alias.is_empty() && !prefixes.iter().any(|p| p == alias) {
                prefixes.push(alias.to_string());
            }
        }
        Self { prefixes }
    }

    /// Destination-relative path for an archive path, or `None` to skip it.
    #[must_use]
    pub fn matches(&self, archive_path: &Path) -> Option<PathBuf> {
        let mut components = archive_path.components();
        components.next()?;
        let rest = components.as_path();

        let top = match rest.components().next()? {
            Component::Normal(top) => top.to_str()?,
            _ => return None,
        };
        // Only files below the selected directory, not a file named like it
        if rest.components().count() < 2 {
            return None;
        }
        self.prefixes
            .iter()
            .any(|p| p == top)
            .then(|| rest.to_path_buf())
    }
}

/// Write the file entries of `archive` under `dest`.
///
/// Directory entries are skipped; parents are created as files land.
/// Symlinks and other special entries are ignored.
///
/// # Errors
/// Returns an error for unreadable entries, absolute or escaping paths, or write failures.
pub fn extract_entries<R: Read>(
    archive: &mut tar::Archive<R>,
    dest: &Path,
    filter: Option<&PathFilter>,
) -> Result<usize, RegistryError> {
    let mut written = 0;

    let entries = archive
        .entries()
        .map_err(|e| RegistryError::extract(format!("Failed to read archive entries: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| RegistryError::extract(format!("Failed to read archive entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| RegistryError::extract(format!("Failed to read entry path: {e}")))?
            .into_owned();

        if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(RegistryError::extract(format!(
                "Archive entry escapes destination: {}",
                path.display()
            )));
        }

        let rel = match filter {
            Some(filter) => match filter.matches(&path) {
                Some(rel) => rel,
                None => {
                    trace!(path = %path.display(), "Skipping entry outside module sources");
                    continue;
                }
            },
            None => path,
        };

        let dest_path = dest.join(&rel);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&dest_path)?;
        io::copy(&mut entry, &mut file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(mode) = entry.header().mode() {
                let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
            }
        }

        written += 1;
    }

    Ok(written)
}

/// Live gzipped tarball of a repository-hosted module version.
pub struct RemoteInstance {
    stream: ByteStream,
    filter: PathFilter,
}

impl std::fmt::Debug for RemoteInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInstance")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl RemoteInstance {
    pub fn new(stream: ByteStream, filter: PathFilter) -> Self {
        Self { stream, filter }
    }

    /// Decompress and unpack while the body is still arriving.
    ///
    /// # Errors
    /// Returns the transport error if the download fails, otherwise any extraction error.
    pub async fn extract(self, dest: &Path) -> Result<usize, RegistryError> {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(STREAM_BUFFER);
        let dest = dest.to_path_buf();
        let filter = self.filter;

        let extractor = tokio::task::spawn_blocking(move || {
            let reader = ChannelReader {
                rx,
                current: Bytes::new(),
            };
            let mut archive = tar::Archive::new(GzDecoder::new(reader));
            extract_entries(&mut archive, &dest, Some(&filter))
        });

        let mut stream = self.stream;
        let pump = async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        // Receiver gone means the extractor already stopped
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                        return Err(e);
                    }
                }
            }
            Ok(())
        };

        let (pumped, extracted) = tokio::join!(pump, extractor);
        pumped?;
        extracted?
    }
}

/// Blocking reader over chunks sent from the async side.
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current = self.current.slice(n..);
        Ok(n)
    }
}

/// Something that can be unpacked into a destination directory.
#[derive(Debug)]
pub enum ModuleInstance {
    Archive(Archive),
    Stream(RemoteInstance),
}

impl ModuleInstance {
    /// Unpack into `dest`. Returns the number of files written.
    ///
    /// # Errors
    /// Returns any transport or extraction error.
    pub async fn extract(self, dest: &Path) -> Result<usize, RegistryError> {
        match self {
            Self::Archive(archive) => archive.extract(dest).await,
            Self::Stream(remote) => remote.extract(dest).await,
        }
    }
}
