//! Single-file cassette

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::{ensure_named, write_atomic, FixtureStore, StoreStats, Usage};
use crate::cache::{ContentCache, Decoded};
use crate::codec::{Format, Library};
use crate::fingerprint::{Fingerprint, FingerprintOptions};
use crate::response::{RawResponse, StoredResponse};
use crate::{CassetteError, Result};

/// Cassette stored as one file mapping fingerprints to responses
///
/// The whole file is loaded on first access and rewritten on flush.
pub struct FileStore {
    path: PathBuf,
    format: Format,
    options: FingerprintOptions,
    cache: Arc<ContentCache>,
    data: Option<Library>,
    dirty: bool,
    usage: Usage,
}

impl FileStore {
    /// Create a store for `path`; nothing is read until first access
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
            data: None,
            dirty: false,
            usage: Usage::new(track_usage),
        }
    }

    fn data(&mut self) -> Result<&mut Library> {
        if self.data.is_none() {
            let loaded = self.load()?;
            self.data = Some(loaded);
        }
        Ok(self.data.get_or_insert_with(Library::new))
    }

    fn load(&self) -> Result<Library> {
        if !self.path.exists() {
            info!("File '{}' does not exist.", self.path.display());
            return Ok(Library::new());
        }

        // The cached map is shared; the overlay is a private copy.
        let shared = self.cache.read_library(&self.path, self.format)?;
        Ok(Library::clone(&shared))
    }
}

impl FixtureStore for FileStore {
    fn contains(&mut self, fingerprint: &Fingerprint) -> Result<bool> {
        let found = self.data()?.contains_key(fingerprint);
        self.usage.record(fingerprint, found);
        Ok(found)
    }

    fn get(&mut self, fingerprint: &Fingerprint) -> Result<StoredResponse> {
        self.data()?
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| CassetteError::NotFound(fingerprint.to_string()))
    }

    fn put(&mut self, fingerprint: Fingerprint, raw: RawResponse) -> Result<StoredResponse> {
        ensure_named(&fingerprint)?;
        let stored = StoredResponse::from_raw(raw)?;
        self.data()?.insert(fingerprint, stored.clone());
        self.dirty = true;
        Ok(stored)
    }

    fn flush(&mut self) -> Result<()> {
        let format = self.format;
        let data = self.data()?.clone();
        let encoded = format.encode_library(&data)?;

        write_atomic(&self.path, &encoded)?;
        self.cache.store(
            &self.path,
            ContentCache::content_hash(encoded.as_bytes()),
            Decoded::Library(Arc::new(data)),
        );

        info!(
            "Wrote {} responses to '{}'",
            self.data.as_ref().map_or(0, Library::len),
            self.path.display()
        );
        self.dirty = false;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
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
        if !self.usage.track {
            return Ok(Vec::new());
        }

        let keys: Vec<Fingerprint> = self.data()?.keys().cloned().collect();
        Ok(keys
            .into_iter()
            .filter(|fingerprint| !self.usage.was_used(fingerprint))
            .map(|fingerprint| fingerprint.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn new_store(path: PathBuf, cache: Arc<ContentCache>) -> FileStore {
        FileStore::new(path, Format::Yaml, FingerprintOptions::LEGACY, cache, true)
    }

    fn raw(body: &'static str) -> RawResponse {
        RawResponse::from_bytes(200, "OK", vec![], body)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = new_store(temp_dir.path().join("c.yaml"), Arc::new(ContentCache::new()));

        assert!(!store.contains(&Fingerprint::from("http:GET a:80/")).unwrap());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_put_get_flush_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.yaml");
        let cache = Arc::new(ContentCache::new());
        let fingerprint = Fingerprint::from("http:GET a:80/index");

        let mut store = new_store(path.clone(), Arc::clone(&cache));
        store.put(fingerprint.clone(), raw("hello world")).unwrap();
        assert!(store.is_dirty());

        store.flush().unwrap();
        assert!(!store.is_dirty());
        assert!(path.exists());

        let mut reopened = new_store(path, Arc::new(ContentCache::new()));
        assert!(reopened.contains(&fingerprint).unwrap());
        let mut body = String::new();
        reopened
            .get(&fingerprint)
            .unwrap()
            .body()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "hello world");
    }

    #[test]
    fn test_contains_does_not_dirty() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = new_store(temp_dir.path().join("c.yaml"), Arc::new(ContentCache::new()));

        store.contains(&Fingerprint::from("http:GET a:80/")).unwrap();
        store.contains(&Fingerprint::from("http:GET a:80/x")).unwrap();

        assert!(!store.is_dirty());
        assert_eq!(store.stats().misses, 2);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = new_store(temp_dir.path().join("c.yaml"), Arc::new(ContentCache::new()));

        let err = store.get(&Fingerprint::from("http:GET a:80/")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_empty_fingerprint_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = new_store(temp_dir.path().join("c.yaml"), Arc::new(ContentCache::new()));

        let result = store.put(Fingerprint::from(""), raw("x"));
        assert!(matches!(result, Err(CassetteError::Config(_))));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_flush_primes_cache() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.yaml");
        let cache = Arc::new(ContentCache::new());

        let mut store = new_store(path.clone(), Arc::clone(&cache));
        store.put(Fingerprint::from("http:GET a:80/"), raw("x")).unwrap();
        store.flush().unwrap();

        let mut reopened = new_store(path, Arc::clone(&cache));
        assert!(reopened.contains(&Fingerprint::from("http:GET a:80/")).unwrap());
        assert_eq!(cache.hit_count(), 1, "Reload should come from the cache");
    }

    #[test]
    fn test_overlay_changes_do_not_leak_into_cache() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.yaml");
        let cache = Arc::new(ContentCache::new());

        let mut store = new_store(path.clone(), Arc::clone(&cache));
        store.put(Fingerprint::from("http:GET a:80/one"), raw("1")).unwrap();
        store.flush().unwrap();

        let mut first = new_store(path.clone(), Arc::clone(&cache));
        first.put(Fingerprint::from("http:GET a:80/two"), raw("2")).unwrap();

        let mut second = new_store(path, Arc::clone(&cache));
        assert!(!second.contains(&Fingerprint::from("http:GET a:80/two")).unwrap());
    }

    #[test]
    fn test_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.json");
        std::fs::write(&path, "{ nope").unwrap();

        let mut store = FileStore::new(
            path,
            Format::Json,
            FingerprintOptions::LEGACY,
            Arc::new(ContentCache::new()),
            false,
        );
        let result = store.contains(&Fingerprint::from("http:GET a:80/"));
        assert!(matches!(result, Err(CassetteError::Serialization(_))));
    }

    #[test]
    fn test_unused_lists_untouched_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.yaml");
        let cache = Arc::new(ContentCache::new());

        let mut store = new_store(path.clone(), Arc::clone(&cache));
        store.put(Fingerprint::from("http:GET a:80/used"), raw("1")).unwrap();
        store.put(Fingerprint::from("http:GET a:80/unused"), raw("2")).unwrap();
        store.flush().unwrap();

        let mut reopened = new_store(path, cache);
        reopened.contains(&Fingerprint::from("http:GET a:80/used")).unwrap();

        assert_eq!(
            reopened.unused().unwrap(),
            vec!["http:GET a:80/unused".to_string()]
        );
    }
}
