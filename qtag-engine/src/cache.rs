//! Persistent tag cache
//!
//! Durable map from item id to the tag it resolved to and when. Entries are
//! written once per successful resolution and never merged. Expired entries
//! are purged when the cache is flushed; reads skip them in between.
//!
//! The storage key embeds a schema version (`qualityOverlayCache-<version>`).
//! Bumping the version abandons the previous map wholesale.

use crate::metadata::ItemId;
use crate::storage::StorageBackend;
use crate::tag::QualityTag;
use qtag_common::time::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Storage key prefix; the cache version is appended
pub const STORAGE_KEY_PREFIX: &str = "qualityOverlayCache-";

/// Storage key for a cache version
pub fn storage_key(version: &str) -> String {
    format!("{}{}", STORAGE_KEY_PREFIX, version)
}

/// One resolved tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tag: QualityTag,
    /// Unix milliseconds at resolution time
    #[serde(rename = "ts")]
    pub resolved_at: i64,
}

/// Encoded cache contents, ready to be written
#[derive(Debug, Clone)]
pub struct Snapshot {
    key: String,
    payload: String,
    seq: u64,
}

/// Writes snapshots to storage in order
///
/// Writes are serialised, and a snapshot older than the last one written is
/// dropped, so snapshots encoded under the cache lock can be written after
/// it is released.
pub struct CacheWriter {
    storage: Arc<dyn StorageBackend>,
    written: Mutex<u64>,
}

impl CacheWriter {
    fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            written: Mutex::new(0),
        }
    }

    /// Persist a snapshot; returns whether it reached storage
    pub fn write(&self, snapshot: &Snapshot) -> bool {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.seq <= *written {
            trace!(key = %snapshot.key, seq = snapshot.seq, "Skipping superseded cache snapshot");
            return false;
        }
        match self.storage.store(&snapshot.key, &snapshot.payload) {
            Ok(()) => {
                *written = snapshot.seq;
                true
            }
            Err(e) => {
                warn!(key = %snapshot.key, error = %e, "Failed to persist tag cache");
                false
            }
        }
    }
}

/// TTL-bound, versioned tag cache
pub struct PersistentCache {
    writer: Arc<CacheWriter>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl_millis: i64,
    entries: HashMap<ItemId, CacheEntry>,
    seq: u64,
}

impl PersistentCache {
    /// Load the cache for `version` from storage
    ///
    /// Missing or malformed data yields an empty cache. Individual entries
    /// with invalid ids are dropped.
    pub fn load(
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        version: &str,
        ttl: Duration,
    ) -> Self {
        let key = storage_key(version);
        let entries = match storage.load(&key) {
            Ok(Some(text)) => decode(&key, &text),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read tag cache, starting empty");
                HashMap::new()
            }
        };
        debug!(key = %key, entries = entries.len(), "Tag cache loaded");

        Self {
            writer: Arc::new(CacheWriter::new(storage)),
            clock,
            key,
            ttl_millis: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            entries,
            seq: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached tag for an item, unless it has outlived the TTL
    pub fn get(&self, id: &ItemId) -> Option<QualityTag> {
        let now = self.clock.now_millis();
        self.entries
            .get(id)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.tag.clone())
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Record a fresh resolution, replacing any previous entry
    pub fn put(&mut self, id: ItemId, tag: QualityTag) {
        let entry = CacheEntry {
            tag,
            resolved_at: self.clock.now_millis(),
        };
        self.entries.insert(id, entry);
    }

    /// Writer shared by every snapshot of this cache
    pub fn writer(&self) -> Arc<CacheWriter> {
        Arc::clone(&self.writer)
    }

    /// Evict expired entries and encode the rest without touching storage
    ///
    /// Returns the number of entries evicted and the encoded map, if it
    /// could be encoded.
    pub fn snapshot(&mut self) -> (usize, Option<Snapshot>) {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        let ttl = self.ttl_millis;
        self.entries
            .retain(|_, e| now.saturating_sub(e.resolved_at) <= ttl);
        let evicted = before - self.entries.len();

        match serde_json::to_string(&self.entries) {
            Ok(payload) => {
                self.seq += 1;
                let snapshot = Snapshot {
                    key: self.key.clone(),
                    payload,
                    seq: self.seq,
                };
                (evicted, Some(snapshot))
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to encode tag cache");
                (evicted, None)
            }
        }
    }

    /// Evict expired entries and write the map to storage
    ///
    /// Returns the number of entries evicted. A failed write is logged and
    /// skipped; the in-memory map stays authoritative until the next flush.
    pub fn flush(&mut self) -> usize {
        let (evicted, snapshot) = self.snapshot();
        if let Some(snapshot) = snapshot {
            if self.writer.write(&snapshot) {
                debug!(key = %self.key, entries = self.entries.len(), evicted, "Tag cache flushed");
            }
        }
        evicted
    }

    /// Entries currently held, including expired ones not yet flushed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &CacheEntry, now: i64) -> bool {
        now.saturating_sub(entry.resolved_at) > self.ttl_millis
    }
}

fn decode(key: &str, text: &str) -> HashMap<ItemId, CacheEntry> {
    let raw: HashMap<String, serde_json::Value> = match serde_json::from_str(text) {
        Ok(map) => map,
        Err(e) => {
            warn!(key = %key, error = %e, "Stored tag cache is corrupt, starting empty");
            return HashMap::new();
        }
    };

    raw.into_iter()
        .filter_map(|(id, value)| {
            let id = ItemId::parse(&id)?;
            let entry: CacheEntry = serde_json::from_value(value).ok()?;
            Some((id, entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use qtag_common::time::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const T0: i64 = 1_700_000_000_000;

    fn id(n: u8) -> ItemId {
        ItemId::parse(&format!("{:032x}", n)).unwrap()
    }

    fn setup(storage: Arc<MemoryStorage>, clock: Arc<ManualClock>, version: &str) -> PersistentCache {
        PersistentCache::load(storage, clock, version, 7 * DAY)
    }

    #[test]
    fn test_put_get_and_persist() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut cache = setup(storage.clone(), clock.clone(), "v15");
        assert!(cache.is_empty());

        cache.put(id(1), QualityTag::Uhd);
        assert_eq!(cache.get(&id(1)), Some(QualityTag::Uhd));
        assert_eq!(cache.flush(), 0);

        let stored = storage.load("qualityOverlayCache-v15").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(value[id(1).as_str()]["tag"], "UHD");
        assert_eq!(value[id(1).as_str()]["ts"], T0);

        let reloaded = setup(storage, clock, "v15");
        assert_eq!(reloaded.get(&id(1)), Some(QualityTag::Uhd));
    }

    #[test]
    fn test_ttl_boundary() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut cache = setup(storage.clone(), clock.clone(), "v15");
        cache.put(id(1), QualityTag::Flac);

        clock.set(T0 + (7 * DAY).as_millis() as i64 - 1);
        cache.flush();
        assert_eq!(cache.get(&id(1)), Some(QualityTag::Flac));

        clock.set(T0 + (7 * DAY).as_millis() as i64 + 1);
        assert_eq!(cache.flush(), 1);
        assert_eq!(cache.get(&id(1)), None);
        assert_eq!(cache.len(), 0);

        let reloaded = setup(storage, clock, "v15");
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_expired_entry_not_served_before_flush() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut cache = setup(storage, clock.clone(), "v15");
        cache.put(id(2), QualityTag::Sd);

        clock.advance(8 * DAY);
        assert_eq!(cache.get(&id(2)), None);
        // still held until the next flush sweeps it
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_version_isolation() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut v1 = setup(storage.clone(), clock.clone(), "v1");
        v1.put(id(3), QualityTag::Epub);
        v1.flush();

        let v2 = setup(storage.clone(), clock, "v2");
        assert_eq!(v2.get(&id(3)), None);
        assert_eq!(v2.key(), "qualityOverlayCache-v2");
        assert_eq!(storage.keys(), vec!["qualityOverlayCache-v1"]);
    }

    #[test]
    fn test_corrupt_storage_is_empty_cache() {
        let storage = Arc::new(MemoryStorage::new().with_slot("qualityOverlayCache-v15", "{not json"));
        let clock = Arc::new(ManualClock::new(T0));
        let cache = setup(storage, clock, "v15");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bad_entries_are_dropped_individually() {
        let payload = format!(
            r#"{{"{}": {{"tag": "1080p", "ts": {}}}, "short": {{"tag": "SD", "ts": 1}}, "{}": {{"nope": true}}}}"#,
            id(4),
            T0,
            id(5)
        );
        let storage = Arc::new(MemoryStorage::new().with_slot("qualityOverlayCache-v15", &payload));
        let clock = Arc::new(ManualClock::new(T0));
        let cache = setup(storage, clock, "v15");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&id(4)), Some(QualityTag::Hd1080));
    }

    #[test]
    fn test_older_snapshot_never_overwrites_newer() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut cache = setup(storage.clone(), clock, "v15");
        let writer = cache.writer();

        cache.put(id(7), QualityTag::Sd);
        let (_, older) = cache.snapshot();
        cache.put(id(8), QualityTag::Uhd);
        let (_, newer) = cache.snapshot();

        assert!(writer.write(&newer.unwrap()));
        assert!(!writer.write(&older.unwrap()));

        let stored = storage.load("qualityOverlayCache-v15").unwrap().unwrap();
        assert!(stored.contains(id(7).as_str()));
        assert!(stored.contains(id(8).as_str()));
    }

    #[test]
    fn test_put_overwrites() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(T0));
        let mut cache = setup(storage, clock, "v15");
        cache.put(id(6), QualityTag::Sd);
        cache.put(id(6), QualityTag::Hd720);
        assert_eq!(cache.get(&id(6)), Some(QualityTag::Hd720));
        assert_eq!(cache.len(), 1);
    }
}
