//! Recursive directory sizes, memoized per directory modification time.
//!
//! A cached total is only trusted while the directory's own mtime matches the
//! one seen when the total was computed. Two handlers may race to recompute
//! the same directory; both produce the same number, so the map is only
//! locked around lookups and inserts, never across the walk.

use lru::LruCache;
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::SystemTime,
};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::SIZE_CACHE_CAPACITY;

#[derive(Debug, Clone, Copy)]
struct SizeCacheEntry {
    modified_at: SystemTime,
    total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCacheStats {
    pub hits: u64,
    /// Number of full directory walks performed.
    pub walks: u64,
    pub entries: usize,
}

pub struct SizeCache {
    entries: Mutex<LruCache<PathBuf, SizeCacheEntry>>,
    hits: AtomicU64,
    walks: AtomicU64,
}

impl SizeCache {
    pub fn new() -> Self {
        Self::with_capacity(SIZE_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            walks: AtomicU64::new(0),
        }
    }

    /// Total bytes of all regular files below `dir`.
    ///
    /// Never fails: a directory that cannot be stat'ed reports 0.
    pub fn size_of(&self, dir: &Path) -> u64 {
        let modified_at = match dir.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!("Could not read mtime of {}: {}", dir.display(), e);
                return 0;
            }
        };
        let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

        if let Some(entry) = self.lock().get(&key) {
            if entry.modified_at == modified_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.total_bytes;
            }
        }

        let total_bytes = walk_total(&key);
        self.walks.fetch_add(1, Ordering::Relaxed);
        self.lock().put(
            key,
            SizeCacheEntry {
                modified_at,
                total_bytes,
            },
        );
        total_bytes
    }

    pub fn stats(&self) -> SizeCacheStats {
        SizeCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            walks: self.walks.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, SizeCacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SizeCache {
    fn default() -> Self {
        Self::new()
    }
}

fn walk_total(dir: &Path) -> u64 {
    debug!("Calculating size for directory: {}", dir.display());
    let mut total = 0;
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            match entry.metadata() {
                Ok(meta) => total += meta.len(),
                Err(e) => warn!("Could not stat {}: {}", entry.path().display(), e),
            }
        }
    }
    total
}
