//! Hidden-service descriptor cache.
//!
//! Descriptors are keyed by the onion address core (the base32 label without
//! the `.onion` suffix). Each descriptor carries its own publication time; a
//! descriptor is served only while the [`TimeBoundCache`] still holds it *and*
//! its publication window has not closed. A descriptor found to be past its
//! window is removed on lookup, even if the cache-level TTL has not elapsed.
//!
//! ## Persistence
//!
//! When constructed with a directory, the cache:
//!
//! 1. Reads `hs-descriptor-cache.cbor` at startup if it exists and was written
//!    less than 24 hours ago.
//! 2. Writes the full snapshot after every [`DescriptorCache::put`], inside the
//!    same critical section as the in-memory insert.
//!
//! Disk failures are logged and otherwise ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{CacheError, Result, TimeBoundCache};

/// How long a descriptor stays usable after publication.
pub const DESCRIPTOR_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum age of a snapshot file that is still loaded at startup.
pub const PERSISTED_SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Snapshot file name inside the persistence directory.
pub const SNAPSHOT_FILE_NAME: &str = "hs-descriptor-cache.cbor";

/// Default number of cached descriptors.
pub const DEFAULT_MAX_DESCRIPTORS: usize = 1000;

/// Anything with a publication time.
pub trait Publication {
    /// When the descriptor was published.
    fn published_at(&self) -> SystemTime;

    /// Whether the descriptor is still inside its validity window at `now`.
    fn is_valid_at(&self, now: SystemTime) -> bool {
        match now.duration_since(self.published_at()) {
            Ok(age) => age < DESCRIPTOR_VALIDITY,
            // Published in the future relative to our clock: accept.
            Err(_) => true,
        }
    }
}

/// Descriptor cache keyed by onion address core.
pub struct DescriptorCache<D> {
    cache: TimeBoundCache<String, D>,
    snapshot_path: Option<PathBuf>,
    /// Serialises insert + disk write so memory and disk never diverge.
    write_lock: Mutex<()>,
}

impl<D> DescriptorCache<D>
where
    D: Publication + Clone + Serialize + DeserializeOwned,
{
    /// Create an in-memory cache.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            cache: TimeBoundCache::new(max_entries, ttl),
            snapshot_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a cache persisted under `dir`, loading a fresh snapshot if one
    /// exists.
    pub fn with_persistence(max_entries: usize, ttl: Duration, dir: impl AsRef<Path>) -> Self {
        let snapshot_path = dir.as_ref().join(SNAPSHOT_FILE_NAME);
        let cache = Self {
            cache: TimeBoundCache::new(max_entries, ttl),
            snapshot_path: Some(snapshot_path.clone()),
            write_lock: Mutex::new(()),
        };

        match load_snapshot::<D>(&snapshot_path) {
            Ok(Some(entries)) => {
                let now = SystemTime::now();
                let mut loaded = 0usize;
                for (onion, descriptor) in entries {
                    if descriptor.is_valid_at(now) {
                        cache.cache.put(onion, descriptor);
                        loaded += 1;
                    }
                }
                info!(loaded, path = %snapshot_path.display(), "loaded descriptor cache");
            }
            Ok(None) => {
                debug!(path = %snapshot_path.display(), "no fresh descriptor snapshot");
            }
            Err(e) => {
                warn!(path = %snapshot_path.display(), error = %e, "ignoring unreadable descriptor snapshot");
            }
        }

        cache
    }

    /// Path of the snapshot file, if persistence is enabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Insert a descriptor and, if persistence is enabled, write the snapshot
    /// before returning.
    pub fn put(&self, onion: impl Into<String>, descriptor: D) {
        let onion = onion.into();
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.cache.put(onion.clone(), descriptor);
        debug!(%onion, "cached hidden-service descriptor");

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = write_snapshot(path, &self.cache.snapshot()) {
                warn!(path = %path.display(), error = %e, "failed to persist descriptor cache");
            }
        }
    }

    /// Look up a descriptor, removing it if its publication window closed.
    pub fn get(&self, onion: &str) -> Option<D> {
        let key = onion.to_string();
        let descriptor = self.cache.get(&key)?;
        if descriptor.is_valid_at(SystemTime::now()) {
            return Some(descriptor);
        }
        self.evict_stale(key)
    }

    /// Remove `key` if it is still stale under the write lock. A descriptor
    /// stored since the unlocked read is returned instead.
    fn evict_stale(&self, key: String) -> Option<D> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.cache.get(&key)?;
        if current.is_valid_at(SystemTime::now()) {
            return Some(current);
        }
        debug!(onion = %key, "dropping stale hidden-service descriptor");
        self.cache.remove(&key);
        None
    }

    /// Number of cached descriptors.
    pub fn size(&self) -> usize {
        self.cache.size()
    }

    /// Drop every cached descriptor. The snapshot on disk is left untouched.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cache.clear();
    }
}

/// Read a snapshot if it exists and is fresh enough.
fn load_snapshot<D: DeserializeOwned>(path: &Path) -> Result<Option<BTreeMap<String, D>>> {
    if !path.exists() {
        return Ok(None);
    }

    let modified = std::fs::metadata(path)?.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    if age >= PERSISTED_SNAPSHOT_MAX_AGE {
        return Ok(None);
    }

    let bytes = std::fs::read(path)?;
    let entries = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| CacheError::Deserialization(format!("descriptor snapshot: {e}")))?;
    Ok(Some(entries))
}

/// Write `entries` to `path` via a temporary file and rename.
fn write_snapshot<D: Serialize>(path: &Path, entries: &[(String, D)]) -> Result<()> {
    let map: BTreeMap<&str, &D> = entries.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf)
        .map_err(|e| CacheError::Serialization(format!("descriptor snapshot: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("cbor.tmp");
    std::fs::write(&tmp, &buf)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct TestDescriptor {
        published_secs: u64,
        payload: Vec<u8>,
    }

    impl Publication for TestDescriptor {
        fn published_at(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH + Duration::from_secs(self.published_secs)
        }
    }

    fn published_ago(ago: Duration) -> TestDescriptor {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        TestDescriptor {
            published_secs: now.saturating_sub(ago).as_secs(),
            payload: vec![1, 2, 3],
        }
    }

    const ONION: &str = "duskgytldkxiuqc6";

    #[test]
    fn test_fresh_descriptor_is_served() {
        let cache = DescriptorCache::new(10, Duration::from_secs(3600));
        let descriptor = published_ago(Duration::from_secs(60));
        cache.put(ONION, descriptor.clone());
        assert_eq!(cache.get(ONION), Some(descriptor));
    }

    #[test]
    fn test_stale_descriptor_is_removed_before_ttl() {
        let cache = DescriptorCache::new(10, Duration::from_secs(3600));
        cache.put(ONION, published_ago(Duration::from_secs(25 * 60 * 60)));
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get(ONION), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_snapshot_written_on_put_and_reloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let descriptor = published_ago(Duration::from_secs(10));
        {
            let cache = DescriptorCache::with_persistence(10, Duration::from_secs(3600), dir.path());
            cache.put(ONION, descriptor.clone());
            let path = cache.snapshot_path().expect("persistence enabled");
            assert!(path.exists());
        }

        let reloaded: DescriptorCache<TestDescriptor> =
            DescriptorCache::with_persistence(10, Duration::from_secs(3600), dir.path());
        assert_eq!(reloaded.get(ONION), Some(descriptor));
    }

    #[test]
    fn test_reload_skips_stale_descriptors() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let cache = DescriptorCache::with_persistence(10, Duration::from_secs(3600), dir.path());
            cache.put("fresh", published_ago(Duration::from_secs(10)));
            cache.put("stale", published_ago(Duration::from_secs(30 * 60 * 60)));
        }
        let reloaded: DescriptorCache<TestDescriptor> =
            DescriptorCache::with_persistence(10, Duration::from_secs(3600), dir.path());
        assert_eq!(reloaded.size(), 1);
        assert!(reloaded.get("fresh").is_some());
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(SNAPSHOT_FILE_NAME), b"not cbor at all")
            .expect("write garbage");
        let cache: DescriptorCache<TestDescriptor> =
            DescriptorCache::with_persistence(10, Duration::from_secs(3600), dir.path());
        assert_eq!(cache.size(), 0);

        cache.put(ONION, published_ago(Duration::from_secs(1)));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_unwritable_directory_does_not_fail_put() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").expect("write blocker");

        let cache: DescriptorCache<TestDescriptor> =
            DescriptorCache::with_persistence(10, Duration::from_secs(3600), &blocker);
        cache.put(ONION, published_ago(Duration::from_secs(1)));
        assert!(cache.get(ONION).is_some());
    }

    #[test]
    fn test_fresh_replacement_survives_stale_eviction() {
        let cache = DescriptorCache::new(10, Duration::from_secs(3600));
        cache.put(ONION, published_ago(Duration::from_secs(25 * 60 * 60)));
        // A fresh put lands after a reader saw the stale entry.
        let fresh = published_ago(Duration::from_secs(5));
        cache.put(ONION, fresh.clone());

        assert_eq!(cache.evict_stale(ONION.to_string()), Some(fresh));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_stale_eviction_waits_for_writer() {
        let cache = DescriptorCache::new(10, Duration::from_secs(3600));
        cache.put(ONION, published_ago(Duration::from_secs(25 * 60 * 60)));
        let fresh = published_ago(Duration::from_secs(5));

        let seen = std::thread::scope(|scope| {
            let guard = cache.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let reader = scope.spawn(|| cache.get(ONION));
            std::thread::sleep(Duration::from_millis(50));
            // Still present while a writer holds the lock.
            assert_eq!(cache.size(), 1);
            cache.cache.put(ONION.to_string(), fresh.clone());
            drop(guard);
            reader.join().expect("reader thread")
        });

        assert_eq!(seen, Some(fresh));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_clear_waits_for_writer() {
        let cache = DescriptorCache::new(10, Duration::from_secs(3600));
        cache.put(ONION, published_ago(Duration::from_secs(5)));

        std::thread::scope(|scope| {
            let guard = cache.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let clearer = scope.spawn(|| cache.clear());
            std::thread::sleep(Duration::from_millis(50));
            assert_eq!(cache.size(), 1);
            drop(guard);
            clearer.join().expect("clear thread");
        });
        assert_eq!(cache.size(), 0);
    }
}
