//! # Tag Authorization
//!
//! Decides whether an RFID tag may start a charging session. Two sources back
//! the decision: a short-lived in-memory [`TagCache`] and the persisted,
//! versioned [`LocalAuthList`]. [`TagManager`] combines both.

pub mod cache;
pub mod local_list;
pub mod tag_manager;

pub use cache::TagCache;
pub use local_list::LocalAuthList;
pub use tag_manager::TagManager;

use thiserror::Error;

use crate::repo::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("tag not found")]
    TagNotFound,
    #[error("invalid tag id")]
    InvalidTagId,
    #[error("tag limit reached")]
    TagLimitReached,
    #[error("local authorization list not enabled")]
    LocalAuthListNotEnabled,
    #[error("list version {requested} is older than the current version {current}")]
    StaleVersion { current: i32, requested: i32 },
    #[error(transparent)]
    Storage(#[from] StoreError),
}
