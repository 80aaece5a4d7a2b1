use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::domain::IdTagInfo;

/// Lifetime of a cached tag that carries no expiry date.
pub const DEFAULT_TAG_TTL_MINUTES: i64 = 10;

/// Entries allowed above the configured maximum before writes are dropped.
const OVERFLOW_ALLOWANCE: usize = 2;

#[derive(Debug, Clone)]
struct CachedTag {
    info: IdTagInfo,
    expires_at: DateTime<Utc>,
}

/// Size-bounded authorization cache with per-tag expiry.
///
/// Writes that would grow the cache past `max_tags + 2` entries are dropped
/// silently. Updating a tag that is already cached always succeeds.
#[derive(Debug)]
pub struct TagCache {
    entries: RwLock<HashMap<String, CachedTag>>,
    max_tags: AtomicUsize,
}

impl TagCache {
    pub fn new(max_tags: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_tags: AtomicUsize::new(max_tags),
        }
    }

    pub fn add_tag(&self, tag_id: &str, info: IdTagInfo) {
        self.add_tag_at(tag_id, info, Utc::now());
    }

    pub fn add_tag_at(&self, tag_id: &str, info: IdTagInfo, now: DateTime<Utc>) {
        let expires_at = info
            .expiry_date
            .unwrap_or_else(|| now + Duration::minutes(DEFAULT_TAG_TTL_MINUTES));

        let mut entries = self.entries.write();
        entries.retain(|_, cached| cached.expires_at > now);

        let limit = self.max_tags() + OVERFLOW_ALLOWANCE;
        if !entries.contains_key(tag_id) && entries.len() >= limit {
            debug!(tag_id, limit, "tag cache full, dropping tag");
            return;
        }
        debug!(tag_id, %expires_at, "caching tag");
        entries.insert(tag_id.to_string(), CachedTag { info, expires_at });
    }

    pub fn get_tag(&self, tag_id: &str) -> Option<IdTagInfo> {
        self.get_tag_at(tag_id, Utc::now())
    }

    /// The cached record, unless it expired at or before `now`.
    pub fn get_tag_at(&self, tag_id: &str, now: DateTime<Utc>) -> Option<IdTagInfo> {
        self.entries
            .read()
            .get(tag_id)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.info.clone())
    }

    pub fn remove_tag(&self, tag_id: &str) -> bool {
        self.entries.write().remove(tag_id).is_some()
    }

    pub fn clear(&self) {
        debug!("flushing tag cache");
        self.entries.write().clear();
    }

    /// Zero is ignored.
    pub fn set_max_tags(&self, max_tags: usize) {
        if max_tags > 0 {
            self.max_tags.store(max_tags, Ordering::Relaxed);
        }
    }

    pub fn max_tags(&self) -> usize {
        self.max_tags.load(Ordering::Relaxed)
    }

    /// Entries held, expired ones included until the next write.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthorizationStatus;

    #[test]
    fn test_tag_without_expiry_lives_ten_minutes() {
        let cache = TagCache::new(5);
        let now = Utc::now();
        cache.add_tag_at("A", IdTagInfo::accepted(), now);

        assert!(cache.get_tag_at("A", now + Duration::minutes(9)).is_some());
        assert!(cache.get_tag_at("A", now + Duration::minutes(10)).is_none());
    }

    #[test]
    fn test_expiry_date_sets_lifetime() {
        let cache = TagCache::new(5);
        let now = Utc::now();
        cache.add_tag_at(
            "A",
            IdTagInfo::accepted().with_expiry(now + Duration::hours(2)),
            now,
        );
        assert!(cache.get_tag_at("A", now + Duration::minutes(90)).is_some());
        assert!(cache.get_tag_at("A", now + Duration::hours(3)).is_none());
    }

    #[test]
    fn test_writes_past_capacity_are_dropped() {
        let cache = TagCache::new(2);
        let now = Utc::now();
        for id in ["A", "B", "C", "D", "E"] {
            cache.add_tag_at(id, IdTagInfo::accepted(), now);
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.get_tag_at("E", now).is_none());

        cache.add_tag_at("A", IdTagInfo::new(AuthorizationStatus::Blocked), now);
        assert_eq!(
            cache.get_tag_at("A", now).map(|info| info.status),
            Some(AuthorizationStatus::Blocked)
        );
    }

    #[test]
    fn test_expired_entries_free_capacity() {
        let cache = TagCache::new(1);
        let now = Utc::now();
        cache.add_tag_at("A", IdTagInfo::accepted(), now);
        cache.add_tag_at("B", IdTagInfo::accepted(), now);
        cache.add_tag_at("C", IdTagInfo::accepted(), now + Duration::minutes(11));

        assert_eq!(cache.len(), 1);
        assert!(cache.get_tag_at("C", now + Duration::minutes(11)).is_some());
    }

    #[test]
    fn test_remove_clear_and_limits() {
        let cache = TagCache::new(3);
        cache.add_tag("A", IdTagInfo::accepted());
        cache.add_tag("B", IdTagInfo::accepted());

        assert!(cache.remove_tag("A"));
        assert!(!cache.remove_tag("A"));
        cache.clear();
        assert!(cache.is_empty());

        cache.set_max_tags(0);
        assert_eq!(cache.max_tags(), 3);
        cache.set_max_tags(8);
        assert_eq!(cache.max_tags(), 8);
    }
}
