//! # Tag Manager
//!
//! Single authorization decision point. Lookups consult the local list first
//! (when enabled) and fall back to the cache (when enabled).

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

use super::{AuthError, LocalAuthList, TagCache};
use crate::config::AuthConfig;
use crate::domain::{AuthorizationData, IdTagInfo, UpdateType};
use crate::repo::Store;

/// Version reported while the local list is disabled.
pub const DISABLED_LIST_VERSION: i32 = -1;

#[derive(Debug)]
pub struct TagManager {
    cache: TagCache,
    local_list: LocalAuthList,
    cache_enabled: AtomicBool,
    local_list_enabled: AtomicBool,
}

impl TagManager {
    pub fn new(store: Store, cfg: &AuthConfig) -> Self {
        info!(
            cache_enabled = cfg.authorization_cache_enabled,
            local_list_enabled = cfg.local_auth_list_enabled,
            max_tags = cfg.max_tags,
            "creating tag manager"
        );
        Self {
            cache: TagCache::new(cfg.max_tags),
            local_list: LocalAuthList::new(store, cfg.max_tags),
            cache_enabled: AtomicBool::new(cfg.authorization_cache_enabled),
            local_list_enabled: AtomicBool::new(cfg.local_auth_list_enabled),
        }
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    pub fn is_local_list_enabled(&self) -> bool {
        self.local_list_enabled.load(Ordering::Relaxed)
    }

    pub fn toggle_auth_cache(&self, enabled: bool) {
        debug!(enabled, "toggling authorization cache");
        self.cache_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn toggle_local_auth_list(&self, enabled: bool) {
        debug!(enabled, "toggling local authorization list");
        self.local_list_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Applies to both the cache and the local list. Zero is ignored.
    pub fn set_max_tags(&self, max_tags: usize) {
        self.cache.set_max_tags(max_tags);
        self.local_list.set_max_tags(max_tags);
    }

    /// Stores a tag in every enabled source. The cache is refreshed even when
    /// the local list refuses the tag.
    pub fn add_tag(&self, tag_id: &str, info: IdTagInfo) -> Result<(), AuthError> {
        debug!(tag_id, status = %info.status, "adding tag");
        if tag_id.is_empty() {
            return Err(AuthError::InvalidTagId);
        }
        if self.is_cache_enabled() {
            self.cache.add_tag(tag_id, info.clone());
        }
        if self.is_local_list_enabled() {
            self.local_list.add_tag(tag_id, &info).inspect_err(|e| {
                error!(tag_id, error = %e, "cannot add tag to local list");
            })?;
        }
        Ok(())
    }

    pub fn get_tag(&self, tag_id: &str) -> Result<IdTagInfo, AuthError> {
        self.get_tag_at(tag_id, Utc::now())
    }

    /// Looks the tag up as of `now`, which only affects cache expiry.
    pub fn get_tag_at(&self, tag_id: &str, now: DateTime<Utc>) -> Result<IdTagInfo, AuthError> {
        if self.is_local_list_enabled() {
            match self.local_list.get_tag(tag_id) {
                Ok(info) => return Ok(info),
                Err(AuthError::TagNotFound) => {}
                Err(e) => {
                    error!(tag_id, error = %e, "cannot read local list");
                    return Err(e);
                }
            }
        }
        if self.is_cache_enabled() {
            return self
                .cache
                .get_tag_at(tag_id, now)
                .ok_or(AuthError::TagNotFound);
        }
        Err(AuthError::TagNotFound)
    }

    /// Whether the tag may start a session right now.
    pub fn is_tag_authorized(&self, tag_id: &str) -> bool {
        let now = Utc::now();
        match self.get_tag_at(tag_id, now) {
            Ok(info) => info.is_authorized_at(now),
            Err(AuthError::TagNotFound) => false,
            Err(e) => {
                error!(tag_id, error = %e, "authorization lookup failed");
                false
            }
        }
    }

    /// Tags of the local list. Empty while the list is disabled; cached tags
    /// are never included.
    pub fn get_tags(&self) -> Result<Vec<AuthorizationData>, AuthError> {
        if !self.is_local_list_enabled() {
            return Ok(Vec::new());
        }
        self.local_list.get_tags()
    }

    /// Removes a tag from the local list and evicts it from the cache.
    pub fn remove_tag(&self, tag_id: &str) -> Result<(), AuthError> {
        if !self.is_local_list_enabled() {
            return Err(AuthError::LocalAuthListNotEnabled);
        }
        debug!(tag_id, "removing tag");
        self.cache.remove_tag(tag_id);
        self.local_list.remove_tag(tag_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn update_local_auth_list(
        &self,
        version: i32,
        update_type: UpdateType,
        tags: &[AuthorizationData],
    ) -> Result<(), AuthError> {
        if !self.is_local_list_enabled() {
            return Err(AuthError::LocalAuthListNotEnabled);
        }
        debug!(version, %update_type, "updating local list");
        self.local_list
            .apply_update(version, update_type, tags)
            .inspect_err(|e| error!(version, %update_type, error = %e, "local list update failed"))
    }

    /// [`DISABLED_LIST_VERSION`] while the local list is disabled.
    pub fn get_auth_list_version(&self) -> Result<i32, AuthError> {
        if !self.is_local_list_enabled() {
            return Ok(DISABLED_LIST_VERSION);
        }
        self.local_list.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthorizationStatus;
    use chrono::Duration;

    fn manager(cache: bool, local_list: bool) -> TagManager {
        TagManager::new(
            Store::in_memory().unwrap(),
            &AuthConfig {
                authorization_cache_enabled: cache,
                local_auth_list_enabled: local_list,
                max_tags: 5,
            },
        )
    }

    #[test]
    fn test_cached_tag_expires() {
        let tags = manager(true, false);
        let now = Utc::now();
        tags.add_tag("A", IdTagInfo::accepted().with_expiry(now + Duration::minutes(10)))
            .unwrap();

        assert_eq!(tags.get_tag_at("A", now).unwrap().status, AuthorizationStatus::Accepted);
        assert!(matches!(
            tags.get_tag_at("A", now + Duration::minutes(11)),
            Err(AuthError::TagNotFound)
        ));
    }

    #[test]
    fn test_local_list_takes_precedence() {
        let tags = manager(true, true);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        tags.update_local_auth_list(
            1,
            UpdateType::Differential,
            &[AuthorizationData::new(
                "A",
                Some(IdTagInfo::new(AuthorizationStatus::Blocked)),
            )],
        )
        .unwrap();

        assert_eq!(tags.get_tag("A").unwrap().status, AuthorizationStatus::Blocked);
        assert!(!tags.is_tag_authorized("A"));
    }

    #[test]
    fn test_falls_back_to_cache_on_list_miss() {
        let tags = manager(true, true);
        tags.toggle_local_auth_list(false);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        tags.toggle_local_auth_list(true);

        assert!(tags.is_tag_authorized("A"));
    }

    #[test]
    fn test_nothing_enabled() {
        let tags = manager(false, false);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        assert!(matches!(tags.get_tag("A"), Err(AuthError::TagNotFound)));
        assert!(matches!(
            tags.remove_tag("A"),
            Err(AuthError::LocalAuthListNotEnabled)
        ));
        assert!(matches!(
            tags.update_local_auth_list(1, UpdateType::Full, &[]),
            Err(AuthError::LocalAuthListNotEnabled)
        ));
        assert_eq!(tags.get_auth_list_version().unwrap(), DISABLED_LIST_VERSION);
        assert!(tags.get_tags().unwrap().is_empty());
    }

    #[test]
    fn test_remove_tag_evicts_cache() {
        let tags = manager(true, true);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        tags.remove_tag("A").unwrap();
        assert!(matches!(tags.get_tag("A"), Err(AuthError::TagNotFound)));
    }

    #[test]
    fn test_clear_cache_keeps_local_list() {
        let tags = manager(true, true);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        tags.clear_cache();
        assert!(tags.get_tag("A").is_ok());

        tags.toggle_local_auth_list(false);
        assert!(matches!(tags.get_tag("A"), Err(AuthError::TagNotFound)));
    }

    #[test]
    fn test_full_update_to_empty_list() {
        let tags = manager(true, true);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        tags.update_local_auth_list(2, UpdateType::Full, &[]).unwrap();

        assert_eq!(tags.get_auth_list_version().unwrap(), 2);
        assert!(tags.get_tags().unwrap().is_empty());
    }

    #[test]
    fn test_max_tags_applies_to_local_list() {
        let tags = manager(false, true);
        tags.set_max_tags(1);
        tags.add_tag("A", IdTagInfo::accepted()).unwrap();
        assert!(matches!(
            tags.add_tag("B", IdTagInfo::accepted()),
            Err(AuthError::TagLimitReached)
        ));
    }
}
