use crate::domain::cards::{NowProvider, system_now};
use crate::domain::models::CacheEntry;
use crate::infrastructure::blob_store::NamedBlobStore;
use crate::infrastructure::error::InfraError;
use chrono::Duration;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const CACHE_BLOB_NAME: &str = "cache-data.json";

type CacheMap = BTreeMap<String, CacheEntry>;

/// Persisted group id -> resolved block ids map. Every mutation is written
/// through to the blob store before it returns.
pub struct GroupCacheStore<S> {
    store: Arc<S>,
    entries: Mutex<CacheMap>,
    now_provider: NowProvider,
}

impl<S> GroupCacheStore<S>
where
    S: NamedBlobStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: Mutex::new(BTreeMap::new()),
            now_provider: system_now(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheMap>, InfraError> {
        self.entries
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("group cache lock poisoned: {error}")))
    }

    fn persist(&self, entries: &CacheMap) -> Result<(), InfraError> {
        self.store
            .save_named(CACHE_BLOB_NAME, &serde_json::to_value(entries)?)
    }

    /// Replaces the in-memory map with the persisted blob. A corrupt blob is
    /// discarded; the cache is never a source of truth.
    pub fn load(&self) -> Result<usize, InfraError> {
        let loaded = match self.store.load_named(CACHE_BLOB_NAME)? {
            Some(blob) => match serde_json::from_value::<CacheMap>(blob) {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::warn!(%error, "discarding unreadable group cache");
                    BTreeMap::new()
                }
            },
            None => BTreeMap::new(),
        };
        let count = loaded.len();
        *self.lock()? = loaded;
        Ok(count)
    }

    pub fn get(&self, group_id: &str) -> Result<Option<CacheEntry>, InfraError> {
        Ok(self.lock()?.get(group_id).cloned())
    }

    /// True iff an entry exists and `now - timestamp < ttl`.
    pub fn is_valid(&self, group_id: &str, ttl: Duration) -> Result<bool, InfraError> {
        let now = (self.now_provider)();
        Ok(self
            .lock()?
            .get(group_id)
            .map(|entry| now - entry.timestamp < ttl)
            .unwrap_or(false))
    }

    pub fn put(&self, group_id: &str, block_ids: &[String]) -> Result<(), InfraError> {
        let mut seen = HashSet::new();
        let block_ids = block_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let entry = CacheEntry {
            block_ids,
            timestamp: (self.now_provider)(),
        };

        let mut entries = self.lock()?;
        entries.insert(group_id.to_string(), entry);
        self.persist(&entries)
    }

    pub fn clear(&self, group_id: &str) -> Result<(), InfraError> {
        let mut entries = self.lock()?;
        if entries.remove(group_id).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), InfraError> {
        let mut entries = self.lock()?;
        entries.clear();
        self.persist(&entries)
    }

    /// Drops entries at least `max_age` old; returns how many were removed.
    pub fn sweep_expired(&self, max_age: Duration) -> Result<usize, InfraError> {
        let now = (self.now_provider)();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| now - entry.timestamp < max_age);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    pub fn forget_persisted(&self) -> Result<(), InfraError> {
        self.lock()?.clear();
        self.store.remove_named(CACHE_BLOB_NAME)
    }
}
