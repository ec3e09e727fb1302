use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use cf_registry::DimensionId;
use cf_types::OptionItem;
use serde::{Deserialize, Serialize};

/// The canonicalized upstream-selection tuple that addresses the option
/// cache: per parent, values sorted and de-duplicated, parents ordered by
/// dimension id. Two selection states that restrict a child identically
/// always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    #[must_use]
    pub fn from_parents(parents: &BTreeMap<DimensionId, Vec<String>>) -> Self {
        let segments = parents
            .iter()
            .map(|(dimension, values)| {
                let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.dedup();
                format!("{dimension}={}", sorted.join(","))
            })
            .collect::<Vec<_>>()
            .join(";");
        Self(segments)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheEntry {
    options: Vec<OptionItem>,
    inserted_at_ms: u64,
}

/// Option-set cache keyed by `(dimension, canonical key)`. Entries expire
/// after a fixed idle TTL and the whole cache is dropped on metadata
/// refresh. Timestamps are passed in explicitly so expiry is testable.
#[derive(Debug, Clone)]
pub struct OptionCache {
    entries: BTreeMap<(DimensionId, CanonicalKey), CacheEntry>,
    ttl_ms: u64,
}

impl OptionCache {
    #[must_use]
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            ttl_ms,
        }
    }

    #[must_use]
    pub fn get(
        &self,
        dimension: DimensionId,
        key: &CanonicalKey,
        now_ms: u64,
    ) -> Option<&[OptionItem]> {
        let entry = self.entries.get(&(dimension, key.clone()))?;
        if now_ms.saturating_sub(entry.inserted_at_ms) > self.ttl_ms {
            return None;
        }
        Some(&entry.options)
    }

    /// Last writer wins; concurrent completions for the same key carry
    /// identical payloads, so replacement is idempotent.
    pub fn insert(
        &mut self,
        dimension: DimensionId,
        key: CanonicalKey,
        options: Vec<OptionItem>,
        now_ms: u64,
    ) {
        self.entries.insert(
            (dimension, key),
            CacheEntry {
                options,
                inserted_at_ms: now_ms,
            },
        );
    }

    #[must_use]
    pub fn contains(&self, dimension: DimensionId, key: &CanonicalKey, now_ms: u64) -> bool {
        self.get(dimension, key, now_ms).is_some()
    }

    /// Invalidation hook for process-wide metadata refresh.
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn evict_expired(&mut self, now_ms: u64) {
        let ttl_ms = self.ttl_ms;
        self.entries
            .retain(|_, entry| now_ms.saturating_sub(entry.inserted_at_ms) <= ttl_ms);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
