//! Fixture stores: the fingerprint → response mapping behind a cassette
//!
//! A path with an extension is a single-file cassette, anything else is a
//! directory holding one file per fingerprint. Both backends read through
//! the shared [`ContentCache`] and write through [`write_atomic`].

mod directory;
mod file;

pub use directory::DirectoryStore;
pub use file::FileStore;

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::codec::{Format, DEFAULT_FORMAT};
use crate::config::PlayerConfig;
use crate::fingerprint::{Fingerprint, FingerprintOptions};
use crate::response::{RawResponse, StoredResponse};
use crate::{CassetteError, Result};

/// Lookup counters of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups that found a recorded response
    pub hits: usize,
    /// Lookups that did not
    pub misses: usize,
}

/// Contract shared by the single-file and directory backends
pub trait FixtureStore: Send {
    /// Whether a response is recorded under `fingerprint`
    ///
    /// Never changes the recorded data or the dirty flag.
    ///
    /// # Errors
    ///
    /// Returns error if the cassette cannot be loaded
    fn contains(&mut self, fingerprint: &Fingerprint) -> Result<bool>;

    /// A copy of the response recorded under `fingerprint`
    ///
    /// # Errors
    ///
    /// Returns [`CassetteError::NotFound`] if nothing is recorded
    fn get(&mut self, fingerprint: &Fingerprint) -> Result<StoredResponse>;

    /// Capture `raw` under `fingerprint` and mark the store dirty
    ///
    /// # Errors
    ///
    /// Returns error if the fingerprint is empty or the body cannot be read
    fn put(&mut self, fingerprint: Fingerprint, raw: RawResponse) -> Result<StoredResponse>;

    /// Write pending changes to disk and clear the dirty flag
    ///
    /// # Errors
    ///
    /// Returns I/O and encoding errors unchanged
    fn flush(&mut self) -> Result<()>;

    /// Whether there are writes not yet flushed
    fn is_dirty(&self) -> bool;

    /// Layout of the fingerprints this store is keyed by
    fn fingerprint_options(&self) -> FingerprintOptions;

    /// Absolute path of the cassette
    fn path(&self) -> &Path;

    /// Encoding of the cassette files
    fn format(&self) -> Format;

    /// Lookup counters
    fn stats(&self) -> StoreStats;

    /// Recorded entries never looked up, sorted
    ///
    /// Directory stores list filenames, single-file stores list fingerprints.
    /// Empty unless usage tracking is enabled.
    ///
    /// # Errors
    ///
    /// Returns error if the cassette cannot be listed
    fn unused(&mut self) -> Result<Vec<String>>;
}

/// Open the store for `path`, choosing the backend from the path shape
///
/// # Errors
///
/// Returns a configuration error for unsupported formats and an I/O error
/// when the path exists with the other shape
pub fn open(
    path: impl AsRef<Path>,
    config: &PlayerConfig,
    cache: Arc<ContentCache>,
) -> Result<Box<dyn FixtureStore>> {
    let path = absolute(path.as_ref())?;
    let requested = config
        .file_format
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(Format::from_name)
        .transpose()?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) => {
            if path.is_dir() {
                return Err(io::Error::other(format!(
                    "Expected a file, but found a directory at '{}'",
                    path.display()
                ))
                .into());
            }

            let format = match requested {
                Some(format) => format,
                None => Format::from_extension(extension)?,
            };
            let options = FingerprintOptions {
                hash_body: false,
                include_headers: config.hash_include_headers,
            };
            debug!("Opening file cassette {} ({format})", path.display());
            Ok(Box::new(FileStore::new(
                path,
                format,
                options,
                cache,
                config.log_cassette_used,
            )))
        }
        None => {
            if path.is_file() {
                return Err(io::Error::other(format!(
                    "Expected a directory, but found a file at '{}'",
                    path.display()
                ))
                .into());
            }

            let format = requested.unwrap_or(DEFAULT_FORMAT);
            let options = FingerprintOptions {
                hash_body: config.hash_body,
                include_headers: config.hash_include_headers,
            };
            debug!("Opening directory cassette {} ({format})", path.display());
            Ok(Box::new(DirectoryStore::new(
                path,
                format,
                options,
                cache,
                config.log_cassette_used,
            )))
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Replace `path` with `contents` through a temporary file and a rename
///
/// # Errors
///
/// Returns I/O errors unchanged
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    if let Some(permissions) = target_permissions(path)? {
        temp.as_file().set_permissions(permissions)?;
    }
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Permissions the rewritten file should carry
///
/// An existing target keeps its own; a new one gets `0o644` on Unix instead
/// of the `0o600` of temporary files.
fn target_permissions(path: &Path) -> Result<Option<std::fs::Permissions>> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(new_file_permissions()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn new_file_permissions() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<std::fs::Permissions> {
    None
}

/// Lookup bookkeeping shared by both backends
#[derive(Debug, Default)]
struct Usage {
    track: bool,
    used: HashSet<Fingerprint>,
    stats: StoreStats,
}

impl Usage {
    fn new(track: bool) -> Self {
        Self {
            track,
            ..Self::default()
        }
    }

    fn record(&mut self, fingerprint: &Fingerprint, found: bool) {
        if self.track {
            self.used.insert(fingerprint.clone());
        }

        if found {
            self.stats.hits += 1;
            info!("Library has '{}'", fingerprint);
        } else {
            self.stats.misses += 1;
            warn!("Library does not have '{}'", fingerprint);
        }
    }

    fn was_used(&self, fingerprint: &Fingerprint) -> bool {
        self.used.contains(fingerprint)
    }
}

fn ensure_named(fingerprint: &Fingerprint) -> Result<()> {
    if fingerprint.as_str().is_empty() {
        return Err(CassetteError::Config("No cassette name provided".to_string()));
    }
    Ok(())
}
