//! Key layout of the record store.

pub const AUTH_TAG_PREFIX: &str = "auth-tag-";
pub const AUTH_VERSION: &str = "auth-version";
pub const PROFILE_PREFIX: &str = "profile-";
pub const CONNECTOR_PREFIX: &str = "connector-";

pub fn auth_tag(tag_id: &str) -> String {
    format!("{AUTH_TAG_PREFIX}{tag_id}")
}

pub fn profile(profile_id: i32) -> String {
    format!("{PROFILE_PREFIX}{profile_id}")
}

pub fn connector(evse_id: i32, connector_id: i32) -> String {
    format!("{CONNECTOR_PREFIX}{evse_id}-{connector_id}")
}
