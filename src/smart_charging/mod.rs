//! # Smart Charging
//!
//! Charging profile storage and the composite schedule that caps delivered
//! power.

pub mod composite;
pub mod manager;

pub use composite::{create_composite_schedule, create_composite_schedule_at};
pub use manager::{select_profiles, SmartChargingManager};

use thiserror::Error;

use crate::repo::StoreError;

#[derive(Debug, Error)]
pub enum SmartChargingError {
    #[error("cannot apply profile: {0}")]
    CannotApplyProfile(String),
    #[error("profile {0} not found")]
    ProfileNotFound(i32),
    #[error(transparent)]
    Storage(#[from] StoreError),
}
