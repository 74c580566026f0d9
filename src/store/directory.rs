//! Directory cassette: one fixture file per fingerprint

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::{ensure_named, write_atomic, FixtureStore, StoreStats, Usage};
use crate::cache::{ContentCache, Decoded};
use crate::codec::Format;
use crate::fingerprint::{Fingerprint, FingerprintOptions};
use crate::response::{RawResponse, StoredResponse};
use crate::{CassetteError, Result};

/// Cassette stored as a directory of per-request files
///
/// Files are read on demand and kept in memory once touched; a flush writes
/// only the responses recorded since the previous flush.
///
/// Filenames replace `/`, `:` and spaces with `_`, so fingerprints differing
/// only in those characters (`/a/b` and `/a_b`) share one file and replay the
/// same response.
pub struct DirectoryStore {
    path: PathBuf,
    format: Format,
    options: FingerprintOptions,
    cache: Arc<ContentCache>,
    overlay: HashMap<Fingerprint, StoredResponse>,
    pending: BTreeSet<Fingerprint>,
    usage: Usage,
}

impl DirectoryStore {
    /// Create a store for the directory at `path`; it is created on flush
    #[must_use]
    pub fn new(
        path: PathBuf,
        format: Format,
        options: FingerprintOptions,
        cache: Arc<ContentCache>,
        track_usage: bool,
    ) -> Self {
        Self {
            path,
            format,
            options,
            cache,
            overlay: HashMap::new(),
            pending: BTreeSet::new(),
            usage: Usage::new(track_usage),
        }
    }

    /// Filename holding `fingerprint`
    #[must_use]
    pub fn filename(&self, fingerprint: &Fingerprint) -> String {
        format!("{}.{}", fingerprint.file_stem(), self.format.extension())
    }

    /// Full path of the file holding `fingerprint`
    #[must_use]
    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.path.join(self.filename(fingerprint))
    }

    fn load(&self, fingerprint: &Fingerprint) -> Result<StoredResponse> {
        let entry_path = self.entry_path(fingerprint);
        match self.cache.read_response(&entry_path, self.format) {
            Ok(shared) => Ok(StoredResponse::clone(&shared)),
            Err(CassetteError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(CassetteError::NotFound(fingerprint.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

impl FixtureStore for DirectoryStore {
    fn contains(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
        let found =
            self.overlay.contains_key(fingerprint) || self.entry_path(fingerprint).is_file();
        self.usage.record(fingerprint, found);
        Ok(found)
    }

    fn get(&mut self, fingerprint: &Fingerprint) -> Result<StoredResponse> {
        if let Some(response) = self.overlay.get(fingerprint) {
            return Ok(response.clone());
        }

        debug!("Loading '{}' from disk", fingerprint);
        let response = self.load(fingerprint)?;
        self.overlay.insert(fingerprint.clone(), response.clone());
        Ok(response)
    }

    fn put(&mut self, fingerprint: Fingerprint, raw: RawResponse) -> Result<StoredResponse> {
        ensure_named(&fingerprint)?;
        let stored = StoredResponse::from_raw(raw)?;
        self.overlay.insert(fingerprint.clone(), stored.clone());
        self.pending.insert(fingerprint);
        Ok(stored)
    }

    fn flush(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;

        let mut written = 0;
        while let Some(fingerprint) = self.pending.first().cloned() {
            if let Some(response) = self.overlay.get(&fingerprint) {
                let encoded = self.format.encode_response(response)?;
                let entry_path = self.entry_path(&fingerprint);

                write_atomic(&entry_path, &encoded)?;
                self.cache.store(
                    &entry_path,
                    ContentCache::content_hash(encoded.as_bytes()),
                    Decoded::Response(Arc::new(response.clone())),
                );
                written += 1;
            }
            self.pending.remove(&fingerprint);
        }

        info!("Wrote {} responses to '{}'", written, self.path.display());
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    fn fingerprint_options(&self) -> FingerprintOptions {
        self.options
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> Format {
        self.format
    }

    fn stats(&self) -> StoreStats {
        self.usage.stats
    }

    fn unused(&mut self) -> Result<Vec<String>> {
        if !self.usage.track || !self.path.is_dir() {
            return Ok(Vec::new());
        }

        let used: BTreeSet<String> = self
            .usage
            .used
            .iter()
            .map(|fingerprint| self.filename(fingerprint))
            .collect();
        let suffix = format!(".{}", self.format.extension());

        let mut unused = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(&suffix) && !used.contains(&name) {
                unused.push(name);
            }
        }
        unused.sort();
        Ok(unused)
    }
}
