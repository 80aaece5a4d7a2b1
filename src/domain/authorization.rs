use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Authorization status of an id tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
    /// Any status this build does not recognize.
    #[serde(other)]
    Unknown,
}

/// Authorization record for a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl IdTagInfo {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status,
            parent_id_tag: None,
            expiry_date: None,
        }
    }

    pub fn accepted() -> Self {
        Self::new(AuthorizationStatus::Accepted)
    }

    pub fn with_expiry(mut self, expiry_date: DateTime<Utc>) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_parent(mut self, parent_id_tag: impl Into<String>) -> Self {
        self.parent_id_tag = Some(parent_id_tag.into());
        self
    }

    /// A tag may start a session when accepted (or already in a concurrent
    /// transaction) and not past its expiry date.
    pub fn is_authorized_at(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            AuthorizationStatus::Accepted | AuthorizationStatus::ConcurrentTx
        ) && self.expiry_date.map_or(true, |expiry| expiry > now)
    }
}

/// Entry of a local authorization list update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationData {
    pub id_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

impl AuthorizationData {
    pub fn new(id_tag: impl Into<String>, id_tag_info: Option<IdTagInfo>) -> Self {
        Self {
            id_tag: id_tag.into(),
            id_tag_info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum UpdateType {
    Differential,
    Full,
}
