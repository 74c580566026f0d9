//! Content cache for decoded fixture files
//!
//! Decoding a large cassette is far slower than hashing it, so every read
//! hashes the raw bytes first and reuses the decoded value when the file has
//! not changed since it was last seen. A changed hash is the only eviction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::codec::{Format, Library};
use crate::response::StoredResponse;
use crate::{CassetteError, Result};

/// SHA-256 of a fixture file's raw bytes
pub type ContentHash = [u8; 32];

/// Decoded value shared between the cache and its readers
///
/// Values are behind `Arc` and never mutated; stores copy what they need
/// into their own overlay before changing anything.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// A single-file cassette
    Library(Arc<Library>),
    /// One response of a directory cassette
    Response(Arc<StoredResponse>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    hash: ContentHash,
    value: Decoded,
}

/// Cache of decoded fixture files keyed by absolute path
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: DashMap<PathBuf, CacheEntry>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ContentCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache shared by players that are not given their own
    #[must_use]
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ContentCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Hash raw file bytes
    #[must_use]
    pub fn content_hash(bytes: &[u8]) -> ContentHash {
        Sha256::digest(bytes).into()
    }

    /// Return the cached value for `path` if it was decoded from `hash`
    pub fn get(&self, path: &Path, hash: &ContentHash) -> Option<Decoded> {
        let found = self
            .entries
            .get(path)
            .filter(|entry| entry.hash == *hash)
            .map(|entry| entry.value.clone());

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Remember the decoded value of `path`
    pub fn store(&self, path: &Path, hash: ContentHash, value: Decoded) {
        self.entries
            .insert(path.to_path_buf(), CacheEntry { hash, value });
    }

    /// Decode `raw`, the current bytes of `path`, unless they are cached
    ///
    /// # Errors
    ///
    /// Returns whatever `decode` returns for uncached content
    pub fn load_or_decode<F>(&self, path: &Path, raw: &[u8], decode: F) -> Result<Decoded>
    where
        F: FnOnce(&[u8]) -> Result<Decoded>,
    {
        let hash = Self::content_hash(raw);

        if let Some(value) = self.get(path, &hash) {
            debug!("Content cache hit: {}", path.display());
            return Ok(value);
        }

        debug!("Decoding {}", path.display());
        let value = decode(raw)?;
        self.store(path, hash, value.clone());
        Ok(value)
    }

    /// Read and decode a single-file cassette
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn read_library(&self, path: &Path, format: Format) -> Result<Arc<Library>> {
        let raw = std::fs::read(path)?;
        let decoded = self.load_or_decode(path, &raw, |raw| {
            let library = format.decode_library(as_text(path, raw)?)?;
            Ok(Decoded::Library(Arc::new(library)))
        })?;

        match decoded {
            Decoded::Library(library) => Ok(library),
            Decoded::Response(_) => Err(kind_mismatch(path)),
        }
    }

    /// Read and decode one response file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn read_response(&self, path: &Path, format: Format) -> Result<Arc<StoredResponse>> {
        let raw = std::fs::read(path)?;
        let decoded = self.load_or_decode(path, &raw, |raw| {
            let response = format.decode_response(as_text(path, raw)?)?;
            Ok(Decoded::Response(Arc::new(response)))
        })?;

        match decoded {
            Decoded::Response(response) => Ok(response),
            Decoded::Library(_) => Err(kind_mismatch(path)),
        }
    }

    /// Get cache hit count
    #[must_use]
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get cache miss count
    #[must_use]
    pub fn miss_count(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get the number of cached files
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

fn as_text<'a>(path: &Path, raw: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(raw).map_err(|e| {
        CassetteError::Serialization(format!("{} is not valid UTF-8: {e}", path.display()))
    })
}

fn kind_mismatch(path: &Path) -> CassetteError {
    CassetteError::Serialization(format!(
        "{} was cached as a different kind of fixture",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample_response(body: &'static [u8]) -> StoredResponse {
        StoredResponse::new(200, "OK", BTreeMap::new(), vec![], 11, body)
    }

    #[test]
    fn test_cache_creation() {
        let cache = ContentCache::new();

        assert!(cache.is_empty());
        assert_eq!(cache.hit_count(), 0);
        assert_eq!(cache.miss_count(), 0);
    }

    #[test]
    fn test_unchanged_file_is_not_decoded_twice() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("one.json");
        std::fs::write(&path, Format::Json.encode_response(&sample_response(b"a")).unwrap())
            .unwrap();

        let cache = ContentCache::new();
        let first = cache.read_response(&path, Format::Json).unwrap();
        let second = cache.read_response(&path, Format::Json).unwrap();

        assert!(Arc::ptr_eq(&first, &second), "Second read must reuse the value");
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_changed_file_is_decoded_again() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("one.json");
        std::fs::write(&path, Format::Json.encode_response(&sample_response(b"a")).unwrap())
            .unwrap();

        let cache = ContentCache::new();
        let first = cache.read_response(&path, Format::Json).unwrap();

        std::fs::write(&path, Format::Json.encode_response(&sample_response(b"b")).unwrap())
            .unwrap();
        let second = cache.read_response(&path, Format::Json).unwrap();

        assert_eq!(first.content().as_ref(), b"a");
        assert_eq!(second.content().as_ref(), b"b");
        assert_eq!(cache.miss_count(), 2);
    }

    #[test]
    fn test_decode_error_is_not_cached() {
        let cache = ContentCache::new();
        let path = Path::new("/nowhere/broken.json");

        let result = cache.load_or_decode(path, b"{", |_| {
            Err(CassetteError::Serialization("broken".to_string()))
        });

        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cached_value_skips_decoder() {
        let cache = ContentCache::new();
        let path = Path::new("/nowhere/lib.json");
        let raw = b"{}";
        cache.store(
            path,
            ContentCache::content_hash(raw),
            Decoded::Response(Arc::new(sample_response(b""))),
        );

        let decoded = cache
            .load_or_decode(path, raw, |_| unreachable!("cached"))
            .unwrap();
        assert!(matches!(decoded, Decoded::Response(_)));
    }

    #[test]
    fn test_global_is_shared() {
        let a = ContentCache::global();
        let b = ContentCache::global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cache_clear() {
        let cache = ContentCache::new();
        cache.store(
            Path::new("/a"),
            [0u8; 32],
            Decoded::Response(Arc::new(sample_response(b""))),
        );
        assert_eq!(cache.len(), 1);

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.hit_count(), 0);
    }
}
