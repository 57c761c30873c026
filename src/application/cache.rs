//! Per-target cache that keeps serving the last good value.
//!
//! A failed refresh records the error next to the previous value instead of
//! replacing it, so readers can keep answering from stale data while the
//! upstream is shedding load.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::TargetId;

/// Cached value for one target plus its freshness.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    /// When `value` was fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Error from the most recent refresh, cleared by the next success.
    pub last_error: Option<String>,
}

impl<V> CacheEntry<V> {
    const fn empty() -> Self {
        Self {
            value: None,
            fetched_at: None,
            last_error: None,
        }
    }

    /// True when the last refresh failed but an older value is available.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.value.is_some() && self.last_error.is_some()
    }
}

/// Thread-safe stale-while-error cache keyed by target.
pub struct StaleCache<V> {
    entries: RwLock<HashMap<TargetId, CacheEntry<V>>>,
}

impl<V: Clone> StaleCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a fresh value and clear any recorded error.
    pub fn store(&self, target: &TargetId, value: V) {
        self.entries.write().insert(
            target.clone(),
            CacheEntry {
                value: Some(value),
                fetched_at: Some(Utc::now()),
                last_error: None,
            },
        );
    }

    /// Record a failed refresh, keeping the previous value.
    pub fn record_error(&self, target: &TargetId, error: impl ToString) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(target.clone())
            .or_insert_with(CacheEntry::empty);
        entry.last_error = Some(error.to_string());
    }

    #[must_use]
    pub fn get(&self, target: &TargetId) -> Option<CacheEntry<V>> {
        self.entries.read().get(target).cloned()
    }

    /// The cached value, fresh or stale.
    #[must_use]
    pub fn value(&self, target: &TargetId) -> Option<V> {
        self.entries
            .read()
            .get(target)
            .and_then(|entry| entry.value.clone())
    }

    /// Drop the entry for `target`. Returns true if one existed.
    pub fn invalidate(&self, target: &TargetId) -> bool {
        self.entries.write().remove(target).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> Default for StaleCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
