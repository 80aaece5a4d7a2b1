use chrono::{DateTime, Utc};
use strum::IntoEnumIterator;
use tracing::{debug, info};

use super::composite::create_composite_schedule_at;
use super::SmartChargingError;
use crate::config::SmartChargingConfig;
use crate::domain::{ChargingProfile, ChargingProfilePurpose, ScheduleInterval};
use crate::repo::{keys, Records, Store};

/// Stores charging profiles and derives the composite schedule from them.
#[derive(Debug, Clone)]
pub struct SmartChargingManager {
    store: Store,
    limits: SmartChargingConfig,
}

impl SmartChargingManager {
    pub fn new(store: Store, limits: SmartChargingConfig) -> Self {
        Self { store, limits }
    }

    /// Validates and stores a profile, replacing any profile with the same
    /// id. Returns the composite schedule that results.
    pub fn add_profile(
        &self,
        profile: &ChargingProfile,
    ) -> Result<Vec<ScheduleInterval>, SmartChargingError> {
        info!(
            profile_id = profile.charging_profile_id,
            purpose = %profile.charging_profile_purpose,
            stack_level = profile.stack_level,
            "adding charging profile"
        );
        self.check_profile(profile)?;

        let max_profiles = self.limits.max_profiles_installed;
        self.store.update(|txn| {
            let key = keys::profile(profile.charging_profile_id);
            let replaces = txn.contains(&key)?;
            if !replaces && txn.count_prefix(keys::PROFILE_PREFIX)? >= max_profiles {
                return Err(SmartChargingError::CannotApplyProfile(format!(
                    "{max_profiles} profiles already installed"
                )));
            }
            txn.put_json(&key, profile)?;
            Ok(())
        })?;

        let schedule = self.get_composite_schedule()?;
        debug!(
            profile_id = profile.charging_profile_id,
            intervals = schedule.len(),
            "composite schedule updated"
        );
        Ok(schedule)
    }

    fn check_profile(&self, profile: &ChargingProfile) -> Result<(), SmartChargingError> {
        let reject = |reason: String| -> Result<(), SmartChargingError> {
            Err(SmartChargingError::CannotApplyProfile(reason))
        };

        if profile.stack_level < 0 || profile.stack_level > self.limits.max_stack_level {
            return reject(format!(
                "stack level {} outside 0..={}",
                profile.stack_level, self.limits.max_stack_level
            ));
        }
        let periods = profile.charging_schedule.charging_schedule_period.len();
        if periods == 0 {
            return reject("schedule has no periods".to_string());
        }
        if periods > self.limits.max_schedule_periods {
            return reject(format!(
                "{periods} schedule periods exceed the maximum of {}",
                self.limits.max_schedule_periods
            ));
        }
        Ok(())
    }

    pub fn remove_profile(&self, profile_id: i32) -> Result<(), SmartChargingError> {
        let removed = self
            .store
            .update(|txn| Ok::<_, SmartChargingError>(txn.delete(&keys::profile(profile_id))?))?;
        if !removed {
            return Err(SmartChargingError::ProfileNotFound(profile_id));
        }
        info!(profile_id, "charging profile removed");
        Ok(())
    }

    pub fn get_profile(&self, profile_id: i32) -> Result<ChargingProfile, SmartChargingError> {
        self.store
            .view(|txn| Ok::<_, SmartChargingError>(txn.get_json(&keys::profile(profile_id))?))?
            .ok_or(SmartChargingError::ProfileNotFound(profile_id))
    }

    /// Every stored profile, ordered by id.
    pub fn get_profiles(&self) -> Result<Vec<ChargingProfile>, SmartChargingError> {
        let mut profiles: Vec<ChargingProfile> = self.store.view(|txn| {
            Ok::<_, SmartChargingError>(
                txn.scan_json::<ChargingProfile>(keys::PROFILE_PREFIX)?
                    .into_iter()
                    .map(|(_, profile)| profile)
                    .collect(),
            )
        })?;
        profiles.sort_by_key(|p| p.charging_profile_id);
        Ok(profiles)
    }

    pub fn get_composite_schedule(&self) -> Result<Vec<ScheduleInterval>, SmartChargingError> {
        let now = Utc::now();
        let profiles = self.get_profiles()?;
        let selected = select_profiles(&profiles, now);
        Ok(create_composite_schedule_at(selected, now))
    }
}

/// The valid profile with the highest stack level for each purpose.
pub fn select_profiles(profiles: &[ChargingProfile], now: DateTime<Utc>) -> Vec<&ChargingProfile> {
    ChargingProfilePurpose::iter()
        .filter_map(|purpose| {
            profiles
                .iter()
                .filter(|p| p.charging_profile_purpose == purpose && p.is_valid_at(now))
                .max_by_key(|p| p.stack_level)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChargingProfileKind, ChargingRateUnit, ChargingSchedule, ChargingSchedulePeriod,
    };
    use chrono::Duration;
    use rstest::rstest;

    fn limits() -> SmartChargingConfig {
        SmartChargingConfig {
            max_stack_level: 5,
            max_profiles_installed: 3,
            max_schedule_periods: 4,
        }
    }

    fn manager() -> SmartChargingManager {
        SmartChargingManager::new(Store::in_memory().unwrap(), limits())
    }

    fn profile(
        id: i32,
        purpose: ChargingProfilePurpose,
        stack_level: i32,
        limit: f64,
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: None,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                charging_rate_unit: ChargingRateUnit::A,
                charging_schedule_period: vec![ChargingSchedulePeriod::new(0, limit)],
                duration: Some(3600),
                start_schedule: None,
                min_charging_rate: None,
            },
        }
    }

    #[test]
    fn test_add_get_remove() {
        let manager = manager();
        let p = profile(1, ChargingProfilePurpose::TxDefaultProfile, 0, 16.0);
        let schedule = manager.add_profile(&p).unwrap();

        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].limit, 16.0);
        assert_eq!(manager.get_profile(1).unwrap(), p);

        manager.remove_profile(1).unwrap();
        assert!(matches!(
            manager.get_profile(1),
            Err(SmartChargingError::ProfileNotFound(1))
        ));
        assert!(matches!(
            manager.remove_profile(1),
            Err(SmartChargingError::ProfileNotFound(1))
        ));
    }

    #[test]
    fn test_same_id_replaces_profile() {
        let manager = manager();
        manager
            .add_profile(&profile(1, ChargingProfilePurpose::TxProfile, 0, 16.0))
            .unwrap();
        manager
            .add_profile(&profile(1, ChargingProfilePurpose::TxProfile, 1, 10.0))
            .unwrap();

        let profiles = manager.get_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].stack_level, 1);
    }

    #[rstest]
    #[case::stack_level_too_high(profile(1, ChargingProfilePurpose::TxProfile, 6, 16.0))]
    #[case::negative_stack_level(profile(1, ChargingProfilePurpose::TxProfile, -1, 16.0))]
    fn test_invalid_profiles_are_rejected(#[case] p: ChargingProfile) {
        let manager = manager();
        assert!(matches!(
            manager.add_profile(&p),
            Err(SmartChargingError::CannotApplyProfile(_))
        ));
        assert!(manager.get_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_period_limits() {
        let manager = manager();
        let mut p = profile(1, ChargingProfilePurpose::TxProfile, 0, 16.0);
        p.charging_schedule.charging_schedule_period = (0..5)
            .map(|i| ChargingSchedulePeriod::new(i * 600, 16.0))
            .collect();
        assert!(manager.add_profile(&p).is_err());

        p.charging_schedule.charging_schedule_period.clear();
        assert!(manager.add_profile(&p).is_err());
    }

    #[test]
    fn test_installed_profile_limit() {
        let manager = manager();
        for id in 1..=3 {
            manager
                .add_profile(&profile(id, ChargingProfilePurpose::TxDefaultProfile, 0, 16.0))
                .unwrap();
        }
        assert!(matches!(
            manager.add_profile(&profile(4, ChargingProfilePurpose::TxDefaultProfile, 0, 16.0)),
            Err(SmartChargingError::CannotApplyProfile(_))
        ));
        manager
            .add_profile(&profile(2, ChargingProfilePurpose::TxDefaultProfile, 1, 8.0))
            .unwrap();
    }

    #[test]
    fn test_selection_per_purpose() {
        let now = Utc::now();
        let mut expired = profile(4, ChargingProfilePurpose::ChargePointMaxProfile, 5, 6.0);
        expired.valid_to = Some(now - Duration::hours(1));
        let profiles = vec![
            profile(1, ChargingProfilePurpose::TxDefaultProfile, 0, 16.0),
            profile(2, ChargingProfilePurpose::TxDefaultProfile, 2, 12.0),
            profile(3, ChargingProfilePurpose::ChargePointMaxProfile, 1, 32.0),
            expired,
        ];

        let ids: Vec<i32> = select_profiles(&profiles, now)
            .iter()
            .map(|p| p.charging_profile_id)
            .collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_composite_uses_most_restrictive_selected_profile() {
        let manager = manager();
        manager
            .add_profile(&profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, 32.0))
            .unwrap();
        manager
            .add_profile(&profile(2, ChargingProfilePurpose::TxDefaultProfile, 0, 20.0))
            .unwrap();
        let schedule = manager
            .add_profile(&profile(3, ChargingProfilePurpose::TxProfile, 0, 10.0))
            .unwrap();

        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].limit, 10.0);
        assert_eq!(schedule[0].duration, Duration::hours(1));
    }
}
