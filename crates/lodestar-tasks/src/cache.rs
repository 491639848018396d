//! Content-addressable artifact cache
//!
//! Entries live at `<dir>/<hash>/entry.json`, with output files copied under
//! `<dir>/<hash>/files/`. Within one run, [`ArtifactCache::get_or_compute`]
//! guarantees at most one computation per fingerprint: concurrent callers for
//! the same hash wait on a shared cell instead of duplicating work.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::CacheError;

const ENTRY_FILE: &str = "entry.json";
const FILES_DIR: &str = "files";

/// A cached task result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub hash: String,
    pub target: String,
    /// `None` when the process never exited normally
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Workspace relative output file to digest
    pub outputs: BTreeMap<String, String>,
    /// Original execution time
    pub duration: Duration,
    pub created_at: DateTime<Utc>,
    /// Lifetime in effect when the entry was written
    pub lifetime: Duration,
}

impl CacheEntry {
    pub fn new(hash: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            target: target.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            outputs: BTreeMap::new(),
            duration: Duration::ZERO,
            created_at: Utc::now(),
            lifetime: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > self.lifetime
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// What two entries for the same hash must agree on. Captured output is
    /// excluded since it often embeds timestamps.
    fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self.exit_code).as_bytes());
        for (path, digest) in &self.outputs {
            hasher.update(path.as_bytes());
            hasher.update(b"=");
            hasher.update(digest.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Where a resolved entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// Read from disk
    Restored,
    /// Computed by this caller
    Executed,
    /// Computed by a concurrent caller in this run
    Shared,
}

/// Result of [`ArtifactCache::get_or_compute`]
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: Arc<CacheEntry>,
    pub source: EntrySource,
}

type Slot = Result<(Arc<CacheEntry>, bool), Arc<CacheError>>;

/// Persistent cache plus the run's in-flight computations
#[derive(Debug)]
pub struct ArtifactCache {
    dir: PathBuf,
    lifetime: Duration,
    inflight: DashMap<String, Arc<OnceCell<Slot>>>,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>, lifetime: Duration) -> Self {
        Self {
            dir: dir.into(),
            lifetime,
            inflight: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn entry_dir(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    /// Look up a cached result. Expired entries and entries whose output
    /// files have gone missing read as misses.
    pub fn get(&self, hash: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry) = self.read_entry(hash)? else {
            debug!(%hash, "cache miss");
            return Ok(None);
        };

        if entry.is_expired(Utc::now()) {
            debug!(%hash, "cache entry expired");
            return Ok(None);
        }

        if !self.has_outputs(&entry) {
            debug!(%hash, "cached outputs missing");
            return Ok(None);
        }

        debug!(%hash, target = %entry.target, "cache hit");
        Ok(Some(entry))
    }

    fn has_outputs(&self, entry: &CacheEntry) -> bool {
        let files = self.entry_dir(&entry.hash).join(FILES_DIR);
        entry.outputs.keys().all(|path| files.join(path).is_file())
    }

    fn read_entry(&self, hash: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_dir(hash).join(ENTRY_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Store a result, copying its outputs out of `workspace_root`.
    ///
    /// Returns `false` when an identical entry already exists. A live entry
    /// with different content is a [`CacheError::Consistency`] and is never
    /// overwritten. Entries with missing output files are rewritten.
    pub fn put(&self, entry: &CacheEntry, workspace_root: &Path) -> Result<bool, CacheError> {
        if let Some(existing) = self.read_entry(&entry.hash)? {
            if !existing.is_expired(Utc::now()) && self.has_outputs(&existing) {
                if existing.content_digest() == entry.content_digest() {
                    debug!(hash = %entry.hash, "identical entry already cached");
                    return Ok(false);
                }

                let message = format!(
                    "cached result for {} differs from the new result (exit code {:?} vs {:?})",
                    entry.target, existing.exit_code, entry.exit_code
                );
                error!(hash = %entry.hash, %message, "cache consistency violation");
                return Err(CacheError::Consistency {
                    hash: entry.hash.clone(),
                    message,
                });
            }
        }

        debug!(hash = %entry.hash, target = %entry.target, "storing result in cache");
        let entry_dir = self.entry_dir(&entry.hash);
        if entry_dir.exists() {
            fs::remove_dir_all(&entry_dir)?;
        }

        let files = entry_dir.join(FILES_DIR);
        fs::create_dir_all(&files)?;
        for path in entry.outputs.keys() {
            copy_file(&workspace_root.join(path), &files.join(path))?;
        }

        let mut stored = entry.clone();
        stored.lifetime = self.lifetime;

        let json = serde_json::to_string_pretty(&stored)?;
        let tmp = entry_dir.join(format!("{}.tmp", ENTRY_FILE));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, entry_dir.join(ENTRY_FILE))?;
        Ok(true)
    }

    /// Copy an entry's outputs back into the workspace
    pub fn restore(&self, entry: &CacheEntry, workspace_root: &Path) -> Result<usize, CacheError> {
        let files = self.entry_dir(&entry.hash).join(FILES_DIR);
        for path in entry.outputs.keys() {
            copy_file(&files.join(path), &workspace_root.join(path))?;
        }
        Ok(entry.outputs.len())
    }

    /// Resolve `hash` from disk or by running `compute`, at most once per hash
    /// for the lifetime of this cache instance.
    ///
    /// Successful computations are persisted; failed ones are shared with
    /// concurrent callers but never written. Only consistency violations
    /// surface as errors, other write failures are logged.
    pub async fn get_or_compute<F, Fut>(
        &self,
        hash: &str,
        workspace_root: &Path,
        compute: F,
    ) -> Result<Resolved, Arc<CacheError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheEntry>,
    {
        let cell = self.inflight.entry(hash.to_string()).or_default().clone();
        let mut computed_here = false;

        let slot = cell
            .get_or_init(|| async {
                match self.get(hash) {
                    Ok(Some(entry)) => match self.restore(&entry, workspace_root) {
                        Ok(_) => return Ok((Arc::new(entry), true)),
                        Err(e) => warn!(%hash, error = %e, "failed to restore cached outputs"),
                    },
                    Ok(None) => {}
                    Err(e) => warn!(%hash, error = %e, "unreadable cache entry, recomputing"),
                }

                computed_here = true;
                let entry = compute().await;
                if entry.is_success() {
                    match self.put(&entry, workspace_root) {
                        Ok(_) => {}
                        Err(e) if e.is_consistency() => return Err(Arc::new(e)),
                        Err(e) => warn!(%hash, error = %e, "failed to store result in cache"),
                    }
                }
                Ok((Arc::new(entry), false))
            })
            .await
            .clone();

        let (entry, restored) = slot?;
        let source = if computed_here {
            EntrySource::Executed
        } else if restored {
            EntrySource::Restored
        } else {
            EntrySource::Shared
        };

        Ok(Resolved { entry, source })
    }

    /// Remove entries older than `max_age` or past their own lifetime.
    /// Unreadable entries are left for [`ArtifactCache::clean`].
    pub fn evict_stale(&self, max_age: Duration) -> Result<usize, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "evicting stale cache entries");
        if !self.dir.exists() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut evicted = 0;

        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }

            let Ok(contents) = fs::read_to_string(path.join(ENTRY_FILE)) else {
                continue;
            };
            let Ok(entry) = serde_json::from_str::<CacheEntry>(&contents) else {
                continue;
            };

            if entry.age(now) > max_age || entry.is_expired(now) {
                fs::remove_dir_all(&path)?;
                evicted += 1;
            }
        }

        info!(evicted, "cache eviction complete");
        Ok(evicted)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        if !self.dir.exists() {
            return Ok(stats);
        }

        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }

            stats.entries += 1;
            stats.total_size += WalkDir::new(&path)
                .into_iter()
                .flatten()
                .filter_map(|file| file.metadata().ok())
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len())
                .sum::<u64>();
        }

        Ok(stats)
    }

    /// Remove every entry
    pub fn clean(&self) -> Result<usize, CacheError> {
        let stats = self.stats()?;
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        self.inflight.clear();
        info!(removed = stats.entries, "cache cleaned");
        Ok(stats.entries)
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<(), CacheError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}

/// Cache statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        const KB: f64 = 1024.0;
        let size = self.total_size as f64;

        if size < KB {
            format!("{} B", self.total_size)
        } else if size < KB * KB {
            format!("{:.1} KB", size / KB)
        } else if size < KB * KB * KB {
            format!("{:.1} MB", size / (KB * KB))
        } else {
            format!("{:.1} GB", size / (KB * KB * KB))
        }
    }
}
