//! # Local Authorization List
//!
//! Versioned allow-list of tags kept in the record store under the
//! `auth-tag-` namespace. The list version lives in its own key and is only
//! written as the last step of an update, inside the same transaction.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use super::AuthError;
use crate::domain::{AuthorizationData, IdTagInfo, UpdateType};
use crate::repo::store::WriteTxn;
use crate::repo::{keys, Records, Store};

#[derive(Debug)]
pub struct LocalAuthList {
    store: Store,
    max_tags: AtomicUsize,
}

impl LocalAuthList {
    pub fn new(store: Store, max_tags: usize) -> Self {
        Self {
            store,
            max_tags: AtomicUsize::new(max_tags),
        }
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

    pub fn get_tag(&self, tag_id: &str) -> Result<IdTagInfo, AuthError> {
        let data: Option<AuthorizationData> =
            self.store.view(|txn| txn.get_json(&keys::auth_tag(tag_id)))?;
        data.and_then(|d| d.id_tag_info).ok_or(AuthError::TagNotFound)
    }

    pub fn get_tags(&self) -> Result<Vec<AuthorizationData>, AuthError> {
        self.store.view(|txn| {
            Ok(txn
                .scan_json::<AuthorizationData>(keys::AUTH_TAG_PREFIX)?
                .into_iter()
                .map(|(_, data)| data)
                .collect())
        })
    }

    pub fn len(&self) -> Result<usize, AuthError> {
        self.store
            .view(|txn| Ok(txn.count_prefix(keys::AUTH_TAG_PREFIX)?))
    }

    pub fn is_empty(&self) -> Result<bool, AuthError> {
        Ok(self.len()? == 0)
    }

    /// Inserts or overwrites a tag. A new tag is refused once the list holds
    /// `max_tags` entries.
    pub fn add_tag(&self, tag_id: &str, info: &IdTagInfo) -> Result<(), AuthError> {
        let max_tags = self.max_tags();
        self.store
            .update(|txn| put_tag(txn, max_tags, tag_id, info))
    }

    pub fn remove_tag(&self, tag_id: &str) -> Result<(), AuthError> {
        let removed = self
            .store
            .update(|txn| Ok::<_, AuthError>(txn.delete(&keys::auth_tag(tag_id))?))?;
        if !removed {
            return Err(AuthError::TagNotFound);
        }
        debug!(tag_id, "tag removed from local list");
        Ok(())
    }

    /// Removes every tag. The version is kept.
    pub fn remove_all(&self) -> Result<usize, AuthError> {
        let removed = self
            .store
            .update(|txn| Ok::<_, AuthError>(txn.delete_prefix(keys::AUTH_TAG_PREFIX)?))?;
        debug!(removed, "local list cleared");
        Ok(removed)
    }

    /// Current list version, 0 when none was ever stored.
    pub fn version(&self) -> Result<i32, AuthError> {
        self.store.view(|txn| read_version(txn))
    }

    /// Applies a list update in one transaction.
    ///
    /// `Full` replaces the whole list, `Differential` merges the given tags
    /// and removes those sent without tag info. The version is written last;
    /// any failure leaves both the list and its version untouched.
    pub fn apply_update(
        &self,
        version: i32,
        update_type: UpdateType,
        tags: &[AuthorizationData],
    ) -> Result<(), AuthError> {
        let max_tags = self.max_tags();
        self.store.update(|txn| {
            let current = read_version(&*txn)?;
            if version < current {
                return Err(AuthError::StaleVersion {
                    current,
                    requested: version,
                });
            }

            if update_type == UpdateType::Full {
                txn.delete_prefix(keys::AUTH_TAG_PREFIX)?;
            }
            for tag in tags {
                match (&tag.id_tag_info, update_type) {
                    (Some(info), _) => put_tag(txn, max_tags, &tag.id_tag, info)?,
                    (None, UpdateType::Differential) => {
                        txn.delete(&keys::auth_tag(&tag.id_tag))?;
                    }
                    (None, UpdateType::Full) => {
                        warn!(tag_id = %tag.id_tag, "full update entry without tag info, skipping");
                    }
                }
            }

            txn.put_json(keys::AUTH_VERSION, &version)?;
            Ok(())
        })?;

        info!(version, %update_type, tags = tags.len(), "local list updated");
        Ok(())
    }
}

fn read_version(txn: &impl Records) -> Result<i32, AuthError> {
    Ok(txn.get_json::<i32>(keys::AUTH_VERSION)?.unwrap_or(0))
}

fn put_tag(
    txn: &mut WriteTxn<'_>,
    max_tags: usize,
    tag_id: &str,
    info: &IdTagInfo,
) -> Result<(), AuthError> {
    if tag_id.is_empty() {
        return Err(AuthError::InvalidTagId);
    }
    let key = keys::auth_tag(tag_id);
    if !txn.contains(&key)? && txn.count_prefix(keys::AUTH_TAG_PREFIX)? >= max_tags {
        return Err(AuthError::TagLimitReached);
    }
    txn.put_json(&key, &AuthorizationData::new(tag_id, Some(info.clone())))?;
    Ok(())
}
