//! Content cache
//!
//! Authoritative record of library file hashes plus the unsafe-content
//! denylist. Keys are library-relative file names (`10.xlf`, `55.mp4`).
//!
//! A single mutex guards all state. Disk reads and hashing happen outside the
//! lock so callers on the resolver path never wait on file I/O held by another
//! caller.

pub mod hashing;
mod unsafe_list;

pub use unsafe_list::{UnsafeItem, UnsafeKind, UnsafeList};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Hash returned when a file cannot be read; never equal to a manifest MD5
pub const INVALID_HASH: &str = "0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFile {
    pub path: String,
    pub hash: String,
    pub cache_timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
    files: HashMap<String, CachedFile>,
    #[serde(default)]
    unsafe_items: UnsafeList,
}

pub struct ContentCache {
    library: PathBuf,
    grace: Duration,
    state: Mutex<CacheState>,
}

impl ContentCache {
    /// Empty cache over `library`
    pub fn new(library: impl Into<PathBuf>, grace_secs: i64) -> Self {
        Self {
            library: library.into(),
            grace: Duration::seconds(grace_secs),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Load a persisted index; a missing or corrupt file yields an empty cache
    pub fn load(library: impl Into<PathBuf>, grace_secs: i64, index: &Path) -> Self {
        let cache = Self::new(library, grace_secs);

        let state = match std::fs::read_to_string(index) {
            Ok(content) => match serde_json::from_str::<CacheState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %index.display(), error = %e, "Cache index corrupt, starting empty");
                    CacheState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %index.display(), "No cache index yet");
                CacheState::default()
            }
            Err(e) => {
                warn!(path = %index.display(), error = %e, "Cache index unreadable, starting empty");
                CacheState::default()
            }
        };

        info!(
            files = state.files.len(),
            unsafe_items = state.unsafe_items.len(),
            "Content cache loaded"
        );
        *cache.state() = state;
        cache
    }

    /// Write the full state (files + unsafe list) atomically via a temp file
    pub fn save(&self, index: &Path) -> Result<()> {
        let json = {
            let state = self.state();
            serde_json::to_string_pretty(&*state)?
        };

        if let Some(parent) = index.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = index.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, index)?;

        debug!(path = %index.display(), "Content cache checkpointed");
        Ok(())
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    /// Absolute path of a library-relative name
    pub fn full_path(&self, path: &str) -> PathBuf {
        self.library.join(path)
    }

    /// Stored hash if still fresh, else rehash from disk
    ///
    /// Fails closed: an unreadable file yields [`INVALID_HASH`] and its entry
    /// is dropped, forcing a re-download.
    pub fn get_hash(&self, path: &str) -> String {
        let full = self.full_path(path);

        if let Ok(mtime) = hashing::modified_at(&full) {
            if let Some(entry) = self.state().files.get(path) {
                if entry.cache_timestamp >= mtime {
                    return entry.hash.clone();
                }
            }
        }

        match hashing::md5_file(&full) {
            Ok(hash) => {
                self.add(path, &hash);
                hash
            }
            Err(e) => {
                debug!(path = %path, error = %e, "Unable to hash file");
                self.remove(path);
                INVALID_HASH.to_string()
            }
        }
    }

    /// Hash currently recorded for `path`, without touching the disk
    pub fn stored_hash(&self, path: &str) -> Option<String> {
        self.state().files.get(path).map(|f| f.hash.clone())
    }

    pub fn is_valid(&self, path: &str) -> bool {
        self.is_valid_at(path, Utc::now())
    }

    /// Valid iff known, present on disk, and either cached within the grace
    /// window or not modified since it was cached
    pub fn is_valid_at(&self, path: &str, now: DateTime<Utc>) -> bool {
        let cached_at = match self.state().files.get(path) {
            Some(entry) => entry.cache_timestamp,
            None => return false,
        };

        let full = self.full_path(path);
        if !full.is_file() {
            return false;
        }

        if now - cached_at < self.grace {
            return true;
        }

        match hashing::modified_at(&full) {
            Ok(mtime) => mtime <= cached_at,
            Err(_) => false,
        }
    }

    /// Upsert by path, stamped now
    pub fn add(&self, path: &str, hash: &str) {
        self.add_at(path, hash, Utc::now());
    }

    pub fn add_at(&self, path: &str, hash: &str, cached_at: DateTime<Utc>) {
        self.state().files.insert(
            path.to_string(),
            CachedFile {
                path: path.to_string(),
                hash: hash.to_string(),
                cache_timestamp: cached_at,
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.state().files.remove(path);
    }

    pub fn len(&self) -> usize {
        self.state().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<CachedFile> {
        self.state().files.get(path).cloned()
    }

    /// Upsert an unsafe entry keyed by (kind, id, layout_id)
    pub fn mark_unsafe(
        &self,
        kind: UnsafeKind,
        id: &str,
        layout_id: Option<&str>,
        code: i32,
        reason: &str,
        ttl_seconds: i64,
    ) {
        self.mark_unsafe_at(kind, id, layout_id, code, reason, ttl_seconds, Utc::now());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mark_unsafe_at(
        &self,
        kind: UnsafeKind,
        id: &str,
        layout_id: Option<&str>,
        code: i32,
        reason: &str,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) {
        warn!(kind = %kind, id = %id, layout_id = ?layout_id, code, reason = %reason, "Marking content unsafe");
        self.state().unsafe_items.upsert(UnsafeItem {
            kind,
            id: id.to_string(),
            layout_id: layout_id.map(str::to_string),
            code,
            reason: reason.to_string(),
            ttl_seconds,
            created_at: now,
        });
    }

    pub fn is_unsafe(&self, kind: UnsafeKind, id: &str, layout_id: Option<&str>) -> bool {
        self.is_unsafe_at(kind, id, layout_id, Utc::now())
    }

    /// Evicts expired entries as a side effect
    pub fn is_unsafe_at(
        &self,
        kind: UnsafeKind,
        id: &str,
        layout_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        self.state().unsafe_items.is_unsafe(kind, id, layout_id, now)
    }

    pub fn unsafe_items(&self) -> Vec<UnsafeItem> {
        self.state().unsafe_items.items().to_vec()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
