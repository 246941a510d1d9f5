//! In-memory cooldown shortcut in front of the activity store.
//!
//! Lets the hot ingestion path reject a message still inside its cooldown
//! without taking the write gate. A miss proves nothing; the stored
//! activity window stays the authority.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{AccountId, CommunityId};

pub const DEFAULT_CAPACITY: usize = 1000;
/// Entries older than this are dropped when the cache fills up.
pub const STALE_AFTER_MINS: i64 = 5;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    hour_bucket: i64,
    last_counted: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CooldownCache {
    entries: Mutex<HashMap<(AccountId, CommunityId), CacheEntry>>,
    capacity: usize,
    stale_after: Duration,
}

impl Default for CooldownCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CooldownCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            stale_after: Duration::minutes(STALE_AFTER_MINS),
        }
    }

    /// True only when a message was counted in the same hour bucket less
    /// than `cooldown_secs` before `now`.
    pub fn in_cooldown(
        &self,
        key: (AccountId, CommunityId),
        hour_bucket: i64,
        now: DateTime<Utc>,
        cooldown_secs: i64,
    ) -> bool {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(&key).is_some_and(|entry| {
            entry.hour_bucket == hour_bucket
                && now - entry.last_counted < Duration::seconds(cooldown_secs)
        })
    }

    /// Remember a counted message.
    pub fn record(&self, key: (AccountId, CommunityId), hour_bucket: i64, at: DateTime<Utc>) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let stale_after = self.stale_after;
            entries.retain(|_, entry| at - entry.last_counted < stale_after);

            // Still full: drop the oldest entry
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_counted)
                    .map(|(k, _)| *k)
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(key, CacheEntry { hour_bucket, last_counted: at });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cooldown_same_bucket_only() {
        let cache = CooldownCache::default();
        cache.record((1, 10), 100, t0());

        assert!(cache.in_cooldown((1, 10), 100, t0() + Duration::seconds(30), 60));
        assert!(!cache.in_cooldown((1, 10), 100, t0() + Duration::seconds(60), 60));
        assert!(!cache.in_cooldown((1, 10), 103_600, t0() + Duration::seconds(30), 60));
        assert!(!cache.in_cooldown((1, 11), 100, t0(), 60));
        assert!(!cache.in_cooldown((2, 10), 100, t0(), 60));
    }

    #[test]
    fn test_full_cache_evicts_stale_entries() {
        let cache = CooldownCache::new(3);
        cache.record((1, 1), 0, t0());
        cache.record((2, 1), 0, t0());
        cache.record((3, 1), 0, t0() + Duration::minutes(9));

        cache.record((4, 1), 0, t0() + Duration::minutes(10));
        assert_eq!(cache.len(), 2);
        assert!(cache.in_cooldown((3, 1), 0, t0() + Duration::minutes(9), 60));
        assert!(cache.in_cooldown((4, 1), 0, t0() + Duration::minutes(10), 60));
    }

    #[test]
    fn test_full_cache_without_stale_drops_oldest() {
        let cache = CooldownCache::new(2);
        cache.record((1, 1), 0, t0());
        cache.record((2, 1), 0, t0() + Duration::seconds(1));
        cache.record((3, 1), 0, t0() + Duration::seconds(2));

        assert_eq!(cache.len(), 2);
        assert!(!cache.in_cooldown((1, 1), 0, t0() + Duration::seconds(3), 60));
        assert!(cache.in_cooldown((2, 1), 0, t0() + Duration::seconds(3), 60));
    }
}
