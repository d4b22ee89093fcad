use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::SystemTime;

use super::key::{self, DatabaseKey};
use super::value::{DataType, DatabaseValue};

#[derive(Debug, Clone)]
struct StoredValue {
    value: DatabaseValue,
    expires_at: Option<SystemTime>,
}

impl StoredValue {
    fn is_expired_at(&self, now: SystemTime) -> bool {
        key::is_expired(self.expires_at, now)
    }
}

/// One logical keyspace.
///
/// Built on a sharded concurrent map: every operation on a key holds that
/// key's shard lock for its whole duration, so `merge` is atomic per key
/// while operations on keys in other shards run in parallel.
///
/// Expiration is lazy. Reads treat expired entries as absent and drop the
/// stale slot on the way out; [`Database::purge_expired`] sweeps the rest.
#[derive(Debug, Default)]
pub struct Database {
    entries: DashMap<Bytes, StoredValue>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the live value for `key`.
    pub fn get(&self, key: &[u8]) -> Option<DatabaseValue> {
        let now = SystemTime::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired_at(now) {
            drop(entry);
            self.evict(key, now);
            None
        } else {
            Some(entry.value.clone())
        }
    }

    pub fn get_or_default(&self, key: &[u8], default: DatabaseValue) -> DatabaseValue {
        self.get(key).unwrap_or(default)
    }

    /// Returns the key metadata (expiration) of a live entry.
    pub fn get_key(&self, key: &[u8]) -> Option<DatabaseKey> {
        let now = SystemTime::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired_at(now) {
            drop(entry);
            self.evict(key, now);
            None
        } else {
            Some(DatabaseKey::with_expiration(
                entry.key().clone(),
                entry.expires_at,
            ))
        }
    }

    /// Variant held by a live key, without copying the value.
    pub fn data_type(&self, key: &[u8]) -> Option<DataType> {
        let now = SystemTime::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired_at(now) {
            drop(entry);
            self.evict(key, now);
            None
        } else {
            Some(entry.value.data_type())
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get_key(key).is_some()
    }

    /// Inserts or replaces `key`. The stored expiration is exactly the one
    /// carried by `key`.
    pub fn put(&self, key: DatabaseKey, value: DatabaseValue) {
        let expires_at = key.expires_at();
        self.entries.insert(
            key.name().clone(),
            StoredValue { value, expires_at },
        );
    }

    /// Like [`put`](Database::put), returning the live value it replaced.
    pub fn replace(&self, key: DatabaseKey, value: DatabaseValue) -> Option<DatabaseValue> {
        let now = SystemTime::now();
        let expires_at = key.expires_at();
        self.entries
            .insert(key.name().clone(), StoredValue { value, expires_at })
            .filter(|previous| !previous.is_expired_at(now))
            .map(|previous| previous.value)
    }

    /// Stores `value` only when `key` has no live entry. Returns true iff
    /// the value was stored.
    pub fn put_if_absent(&self, key: DatabaseKey, value: DatabaseValue) -> bool {
        let now = SystemTime::now();
        let expires_at = key.expires_at();
        let stored = StoredValue { value, expires_at };
        match self.entries.entry(key.name().clone()) {
            Entry::Occupied(slot) if !slot.get().is_expired_at(now) => false,
            Entry::Occupied(mut slot) => {
                slot.insert(stored);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(stored);
                true
            }
        }
    }

    /// Removes `key`. Returns true iff a live entry was removed.
    pub fn remove(&self, key: &[u8]) -> bool {
        let now = SystemTime::now();
        match self.entries.remove(key) {
            Some((_, stored)) => !stored.is_expired_at(now),
            None => false,
        }
    }

    /// Removes `key` when its live value satisfies `predicate`, checked and
    /// removed under the same lock. Returns true iff the entry was removed.
    pub fn remove_if<F>(&self, key: &[u8], predicate: F) -> bool
    where
        F: FnOnce(&DatabaseValue) -> bool,
    {
        let now = SystemTime::now();
        self.entries
            .remove_if(key, |_, stored| {
                !stored.is_expired_at(now) && predicate(&stored.value)
            })
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Atomic read-modify-write on a single key.
    ///
    /// `combiner` receives the current live value (or `default` when the key
    /// is absent or expired) together with `default`, and returns the value
    /// to store. The new value is stored and returned. When the combiner
    /// fails nothing is written and the error is returned. A live
    /// expiration survives the merge.
    pub fn merge<F, E>(
        &self,
        key: &[u8],
        default: DatabaseValue,
        combiner: F,
    ) -> Result<DatabaseValue, E>
    where
        F: FnOnce(&DatabaseValue, DatabaseValue) -> Result<DatabaseValue, E>,
    {
        let now = SystemTime::now();
        match self.entries.entry(Bytes::copy_from_slice(key)) {
            Entry::Occupied(mut slot) if !slot.get().is_expired_at(now) => {
                let merged = combiner(&slot.get().value, default)?;
                slot.get_mut().value = merged.clone();
                Ok(merged)
            }
            Entry::Occupied(mut slot) => {
                let merged = combiner(&default.clone(), default)?;
                slot.insert(StoredValue {
                    value: merged.clone(),
                    expires_at: None,
                });
                Ok(merged)
            }
            Entry::Vacant(slot) => {
                let merged = combiner(&default.clone(), default)?;
                slot.insert(StoredValue {
                    value: merged.clone(),
                    expires_at: None,
                });
                Ok(merged)
            }
        }
    }

    /// Sets (`Some`) or clears (`None`) the expiration of a live key.
    /// An instant that is not after now removes the key right away.
    /// Returns false when the key does not exist.
    pub fn expire(&self, key: &[u8], expires_at: Option<SystemTime>) -> bool {
        let now = SystemTime::now();
        match self.entries.entry(Bytes::copy_from_slice(key)) {
            Entry::Occupied(slot) if slot.get().is_expired_at(now) => {
                slot.remove();
                false
            }
            Entry::Occupied(slot) if key::is_expired(expires_at, now) => {
                slot.remove();
                true
            }
            Entry::Occupied(mut slot) => {
                slot.get_mut().expires_at = expires_at;
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Point-in-time list of live keys. Calling again restarts the scan.
    pub fn keys(&self) -> impl Iterator<Item = DatabaseKey> {
        let now = SystemTime::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| DatabaseKey::with_expiration(entry.key().clone(), entry.expires_at))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Point-in-time copy of every live entry, used by snapshot export.
    ///
    /// Each entry is read under its own shard lock; entries mutated while the
    /// scan is running may or may not be reflected.
    pub fn entries(&self) -> Vec<(DatabaseKey, DatabaseValue)> {
        let now = SystemTime::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| {
                (
                    DatabaseKey::with_expiration(entry.key().clone(), entry.expires_at),
                    entry.value.clone(),
                )
            })
            .collect()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of live entries. Expired entries are purged during the count.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes `key` only if it is still expired, so a value written
    /// concurrently after the expiration check is left alone.
    fn evict(&self, key: &[u8], now: SystemTime) {
        if self
            .entries
            .remove_if(key, |_, stored| stored.is_expired_at(now))
            .is_some()
        {
            tracing::trace!(key = %String::from_utf8_lossy(key), "evicted expired key");
        }
    }
}
