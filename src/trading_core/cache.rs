//! Caching for fetched market data
//!
//! - `TtlCache`: in-memory map with explicit time-to-live, owned by whoever
//!   fetches (never a process-wide singleton)
//! - zstd-compressed JSON snapshots on disk for slow-changing data such as
//!   the instrument master

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key/value cache whose entries expire after a fixed TTL
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, CacheEntry<V>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, CacheEntry { value, inserted_at: Instant::now() });
    }

    pub fn invalidate(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load a zstd JSON snapshot if it exists and is younger than `max_age`
pub fn load_snapshot<T: DeserializeOwned>(path: &Path, max_age: Duration) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("reading metadata of {}", path.display()))?;
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    if age >= max_age {
        debug!("Snapshot {} is stale ({}s old)", path.display(), age.as_secs());
        return Ok(None);
    }

    let compressed = std::fs::read(path)?;
    let json = zstd::decode_all(&compressed[..])?;
    let data: T = serde_json::from_slice(&json)
        .with_context(|| format!("decoding snapshot {}", path.display()))?;

    info!("Loaded snapshot {}", path.display());
    Ok(Some(data))
}

/// Write a zstd JSON snapshot, creating parent directories
pub fn store_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory {}", parent.display()))?;
    }
    let json = serde_json::to_vec(value)?;
    let compressed = zstd::encode_all(&json[..], 3)?;
    std::fs::write(path, compressed).with_context(|| format!("writing snapshot {}", path.display()))?;
    debug!("Stored snapshot {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_cache_hit_and_invalidate() {
        let mut cache = TtlCache::new(Duration::from_secs(300));
        cache.insert("NIFTY:2024-11-21", vec![1.0, 2.0]);
        assert_eq!(cache.get(&"NIFTY:2024-11-21"), Some(vec![1.0, 2.0]));
        assert_eq!(cache.get(&"BANKNIFTY:2024-11-21"), None);

        assert!(cache.invalidate(&"NIFTY:2024-11-21"));
        assert!(!cache.invalidate(&"NIFTY:2024-11-21"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_cache_expiry() {
        let mut cache = TtlCache::new(Duration::ZERO);
        cache.insert(1u32, "value".to_string());
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip_and_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("instruments.json.zst");
        let rows = vec![("NIFTY24N2126800CE".to_string(), 75u32)];

        assert!(load_snapshot::<Vec<(String, u32)>>(&path, Duration::from_secs(60)).unwrap().is_none());
        store_snapshot(&path, &rows).unwrap();

        let loaded: Option<Vec<(String, u32)>> = load_snapshot(&path, Duration::from_secs(60)).unwrap();
        assert_eq!(loaded, Some(rows));

        let stale: Option<Vec<(String, u32)>> = load_snapshot(&path, Duration::ZERO).unwrap();
        assert!(stale.is_none());
    }
}
