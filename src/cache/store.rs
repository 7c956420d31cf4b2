//! Bounded, persistent cache store
//!
//! The in-memory index is authoritative; every indexed entry is mirrored by one JSON
//! record under the cache directory. Records are reconciled with the index on first
//! use: unreadable, inconsistent or expired records are deleted rather than retried.
//!
//! Capacity is enforced before every write by evicting the entry with the oldest
//! `created_at` (insertion order, not access recency) until both the byte budget and
//! the entry budget fit.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use serde_json::value::RawValue;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::entry::{record_stem, CacheEntry};
use super::stats::CacheStats;
use crate::failure::{CacheFailure, Failure, Result};

/// Default byte budget (50 MiB)
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Default entry budget
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Largest share of the byte budget a single entry may take
pub const DEFAULT_MAX_ENTRY_FRACTION: f64 = 0.1;

/// Limits and location of a [`CacheStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Directory holding one record per key
    pub dir: PathBuf,
    pub max_size_bytes: u64,
    pub max_entries: usize,
    pub max_entry_fraction: f64,
}

impl CacheConfig {
    /// Default limits rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_fraction: DEFAULT_MAX_ENTRY_FRACTION,
        }
    }

    /// Platform cache directory for lmsfetch (`~/.cache/lmsfetch/` on Linux)
    ///
    /// Returns `None` if no home directory can be determined.
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "lmsfetch")?;
        Some(project_dirs.cache_dir().to_path_buf())
    }

    /// Total byte budget across all entries
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Entry count budget
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Share of the byte budget one entry may take
    pub fn with_max_entry_fraction(mut self, fraction: f64) -> Self {
        self.max_entry_fraction = fraction;
        self
    }

    /// Largest payload a single `put` accepts
    pub fn max_entry_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.max_entry_fraction) as u64
    }
}

/// A cached value read back regardless of freshness
#[derive(Debug, Clone, PartialEq)]
pub struct CachedData<T> {
    pub data: T,
    /// When the value was written
    pub cached_at: DateTime<Utc>,
    pub is_expired: bool,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Insertion sequence, breaks `created_at` ties
    seq: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    initialized: bool,
    index: HashMap<String, Slot>,
    total_size: u64,
    next_seq: u64,
    stats: CacheStats,
}

impl StoreState {
    fn insert(&mut self, entry: CacheEntry) {
        self.total_size += entry.size_bytes;
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(old) = self.index.insert(entry.key.clone(), Slot { entry, seq }) {
            self.total_size -= old.entry.size_bytes;
        }
    }

    fn take(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.index.remove(key)?;
        self.total_size -= slot.entry.size_bytes;
        Some(slot.entry)
    }

    fn oldest_key(&self) -> Option<String> {
        self.index
            .iter()
            .min_by_key(|(_, slot)| (slot.entry.created_at, slot.seq))
            .map(|(key, _)| key.clone())
    }
}

/// Bounded key/value cache persisted one file per key
///
/// Created once per process and initialized lazily: every public operation first
/// reconciles the directory if that has not happened yet. All index mutation runs
/// under one async mutex, which is held across the record I/O of that operation.
#[derive(Debug)]
pub struct CacheStore {
    config: CacheConfig,
    state: Mutex<StoreState>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Store with default limits under `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(CacheConfig::new(dir))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Opens the cache directory and loads every valid record into the index
    ///
    /// Idempotent. Fails with `Cache.corruptedData` only when the directory itself
    /// cannot be created or listed; bad records are deleted and logged.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await
    }

    /// Serializes `value` and stores it under `key` for `ttl`
    ///
    /// Replaces any previous entry for `key`, then evicts the oldest entries until the
    /// new one fits both budgets. A ttl too large to represent as a timestamp stores
    /// the entry without expiry.
    ///
    /// # Arguments
    /// * `key` - Logical cache key (e.g., "courses/42/assignments")
    /// * `value` - The data to cache (must implement Serialize)
    /// * `ttl` - How long the entry stays fresh
    /// * `etag` - Server validator to keep alongside the value
    ///
    /// # Returns
    /// * `Ok(())` once the record is written and indexed
    /// * `Err(Cache.sizeLimitExceeded)` if the payload exceeds the single-entry budget
    /// * `Err(Cache.corruptedData)` if serialization or the record write fails
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        etag: Option<String>,
    ) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("failed to serialize value for '{}': {}", key, e),
            )
        })?;
        let payload = RawValue::from_string(json).map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("serialized value for '{}' is not valid JSON: {}", key, e),
            )
        })?;

        let size = payload.get().len() as u64;
        let limit = self.config.max_entry_bytes();
        if size > limit {
            return Err(Failure::cache(
                CacheFailure::SizeLimitExceeded,
                format!("value for '{}' is {} bytes, limit is {}", key, size, limit),
            )
            .with_details(json!({ "key": key, "size": size, "limit": limit })));
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| {
            Failure::configuration(format!("ttl for '{}' out of range: {}", key, e))
        })?;
        let entry = CacheEntry::new(key.to_string(), payload, Utc::now(), Some(ttl), etag);

        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        // Replacing a key frees its slot before capacity is checked.
        state.take(key);
        self.enforce_capacity(&mut state, size, 1).await;

        let record = serde_json::to_vec(&entry).map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("failed to encode record for '{}': {}", key, e),
            )
        })?;
        let path = self.record_path(key);
        if let Err(e) = fs::write(&path, record).await {
            warn!(key, path = %path.display(), error = %e, "failed to persist cache record");
            self.delete_record(key).await;
            return Err(Failure::cache(
                CacheFailure::CorruptedData,
                format!("failed to persist '{}': {}", key, e),
            ));
        }

        debug!(key, size, "cached entry");
        state.insert(entry);
        Ok(())
    }

    /// Reads a live value
    ///
    /// # Arguments
    /// * `key` - The cache key to read
    ///
    /// # Returns
    /// * `Ok(Some(value))` for a present, unexpired entry (a hit)
    /// * `Ok(None)` when nothing is stored under `key` (a miss)
    /// * `Err(Cache.expired(key))` when the entry had expired; it is evicted, so the
    ///   next read is a plain miss
    /// * `Err(Cache.corruptedData)` when the payload no longer fits `T`; the entry is
    ///   removed
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        let expired = match state.index.get(key) {
            None => {
                state.stats.record_miss();
                debug!(key, "cache miss");
                return Ok(None);
            }
            Some(slot) => slot.entry.is_expired(),
        };

        if expired {
            state.take(key);
            state.stats.record_miss();
            self.delete_record(key).await;
            debug!(key, "cache entry expired");
            return Err(Failure::expired(key));
        }

        let decoded = match state.index.get(key) {
            Some(slot) => serde_json::from_str::<T>(slot.entry.payload.get()),
            None => return Ok(None),
        };

        match decoded {
            Ok(value) => {
                state.stats.record_hit();
                debug!(key, "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                state.take(key);
                self.delete_record(key).await;
                warn!(key, error = %e, "discarding cache entry that no longer decodes");
                Err(Failure::cache(
                    CacheFailure::CorruptedData,
                    format!("cached value for '{}' could not be decoded: {}", key, e),
                ))
            }
        }
    }

    /// Reads a value whether or not it has expired
    ///
    /// Never evicts and does not count as a hit or miss. Used for stale fallback.
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CachedData<T>>> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        let Some(slot) = state.index.get(key) else {
            return Ok(None);
        };
        let data = serde_json::from_str::<T>(slot.entry.payload.get()).map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("cached value for '{}' could not be decoded: {}", key, e),
            )
        })?;

        Ok(Some(CachedData {
            data,
            cached_at: slot.entry.created_at,
            is_expired: slot.entry.is_expired(),
        }))
    }

    /// The stored ETag for a live entry
    pub async fn etag(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;
        Ok(state
            .index
            .get(key)
            .filter(|slot| !slot.entry.is_expired())
            .and_then(|slot| slot.entry.etag.clone()))
    }

    /// Removes `key`; returns whether it was present
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        let removed = state.take(key).is_some();
        self.delete_record(key).await;
        Ok(removed)
    }

    /// Drops every entry and every record in the cache directory
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        state.index.clear();
        state.total_size = 0;

        let mut dir = fs::read_dir(&self.config.dir).await.map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("failed to list {}: {}", self.config.dir.display(), e),
            )
        })?;
        loop {
            let item = match dir.next_entry().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        dir = %self.config.dir.display(),
                        error = %e,
                        "stopped clearing cache directory"
                    );
                    break;
                }
            };
            let path = item.path();
            if is_record(&path) {
                remove_file_quietly(&path).await;
            }
        }

        info!(dir = %self.config.dir.display(), "cache cleared");
        Ok(())
    }

    /// Whether a live (unexpired) entry exists for `key`
    pub async fn contains(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;
        Ok(state
            .index
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired()))
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state).await?;

        let mut stats = state.stats.clone();
        stats.entry_count = state.index.len();
        stats.total_size_bytes = state.total_size;
        Ok(stats)
    }

    async fn ensure_initialized(&self, state: &mut StoreState) -> Result<()> {
        if state.initialized {
            return Ok(());
        }

        let dir = &self.config.dir;
        fs::create_dir_all(dir).await.map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("failed to create cache directory {}: {}", dir.display(), e),
            )
        })?;
        let mut listing = fs::read_dir(dir).await.map_err(|e| {
            Failure::cache(
                CacheFailure::CorruptedData,
                format!("failed to open cache directory {}: {}", dir.display(), e),
            )
        })?;

        let now = Utc::now();
        let mut loaded = Vec::new();
        let mut discarded = 0usize;
        loop {
            let item = match listing.next_entry().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "stopped scanning cache directory");
                    break;
                }
            };
            let path = item.path();
            if !is_record(&path) {
                continue;
            }

            match read_record(&path).await {
                Some(entry) if entry.is_expired_at(now) => {
                    debug!(key = %entry.key, "dropping expired cache record");
                    remove_file_quietly(&path).await;
                    discarded += 1;
                }
                Some(entry) => loaded.push(entry),
                None => {
                    warn!(path = %path.display(), "discarding unreadable cache record");
                    remove_file_quietly(&path).await;
                    discarded += 1;
                }
            }
        }

        loaded.sort_by_key(|entry| entry.created_at);
        for entry in loaded {
            state.insert(entry);
        }
        state.initialized = true;

        // A smaller budget than last run still has to hold.
        self.enforce_capacity(state, 0, 0).await;

        info!(
            dir = %dir.display(),
            entries = state.index.len(),
            bytes = state.total_size,
            discarded,
            "cache initialized"
        );
        Ok(())
    }

    /// Evicts oldest entries until `incoming` bytes and `reserve` new slots fit
    async fn enforce_capacity(&self, state: &mut StoreState, incoming: u64, reserve: usize) {
        while state.total_size + incoming > self.config.max_size_bytes
            || state.index.len() + reserve > self.config.max_entries
        {
            let Some(key) = state.oldest_key() else {
                break;
            };
            state.take(&key);
            state.stats.record_eviction();
            self.delete_record(&key).await;
            debug!(key = %key, "evicted oldest cache entry");
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.config.dir.join(format!("{}{}", record_stem(key), RECORD_SUFFIX))
    }

    async fn delete_record(&self, key: &str) {
        remove_file_quietly(&self.record_path(key)).await;
    }
}

const RECORD_SUFFIX: &str = ".json";

/// Stem of a record file name, matched on the suffix so `.json` itself counts
fn record_file_stem(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(RECORD_SUFFIX)
}

fn is_record(path: &Path) -> bool {
    record_file_stem(path).is_some()
}

/// Parses a record; `None` for anything unreadable, malformed or misfiled
async fn read_record(path: &Path) -> Option<CacheEntry> {
    let content = fs::read(path).await.ok()?;
    let entry: CacheEntry = serde_json::from_slice(&content).ok()?;
    let stem = record_file_stem(path)?;
    if !entry.is_consistent() || record_stem(&entry.key) != stem {
        return None;
    }
    Some(entry)
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete cache record");
        }
    }
}
