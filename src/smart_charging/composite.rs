//! # Composite Schedule
//!
//! Flattens the periods of several charging profiles into one timeline.
//! Every period start and end is a timestamp, and each timestamp carries the
//! lowest limit of all periods starting or ending there. Each pair of
//! adjacent timestamps forms an interval with the limit recorded at its
//! start. The last timestamp opens no interval.
//!
//! All profiles are anchored at the same instant (the time of computation)
//! regardless of their own `valid_from` or schedule start.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::BTreeMap;

use crate::domain::{ChargingProfile, ScheduleInterval};

pub fn create_composite_schedule<'a>(
    profiles: impl IntoIterator<Item = &'a ChargingProfile>,
) -> Vec<ScheduleInterval> {
    create_composite_schedule_at(profiles, Utc::now())
}

/// Composite schedule with every profile anchored at `anchor`.
pub fn create_composite_schedule_at<'a>(
    profiles: impl IntoIterator<Item = &'a ChargingProfile>,
    anchor: DateTime<Utc>,
) -> Vec<ScheduleInterval> {
    let mut min_limits: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    let mut record = |at: DateTime<Utc>, limit: f64| {
        min_limits
            .entry(at)
            .and_modify(|current| *current = current.min(limit))
            .or_insert(limit);
    };

    for span in profiles
        .into_iter()
        .flat_map(|profile| profile.charging_schedule.period_spans())
        .filter(|span| span.limit.is_finite())
    {
        record(anchor + span.start, span.limit);
        if let Some(end) = span.end {
            record(anchor + end, span.limit);
        }
    }

    min_limits
        .into_iter()
        .tuple_windows()
        .map(|((start, limit), (end, _))| ScheduleInterval {
            start_time: start,
            duration: end - start,
            limit,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit, ChargingSchedule,
        ChargingSchedulePeriod,
    };
    use chrono::Duration;
    use proptest::prelude::*;

    const HOUR: i64 = 3600;

    fn profile(id: i32, periods: &[(i64, f64)], duration: Option<i64>) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurpose::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                charging_rate_unit: ChargingRateUnit::A,
                charging_schedule_period: periods
                    .iter()
                    .map(|(start, limit)| ChargingSchedulePeriod::new(*start, *limit))
                    .collect(),
                duration,
                start_schedule: None,
                min_charging_rate: None,
            },
        }
    }

    fn summary(intervals: &[ScheduleInterval], anchor: DateTime<Utc>) -> Vec<(i64, i64, f64)> {
        intervals
            .iter()
            .map(|i| {
                (
                    (i.start_time - anchor).num_seconds(),
                    i.duration.num_seconds(),
                    i.limit,
                )
            })
            .collect()
    }

    #[test]
    fn test_overlapping_profiles_take_minimum() {
        let anchor = Utc::now();
        let a = profile(1, &[(0, 32.0)], Some(2 * HOUR));
        let b = profile(2, &[(HOUR, 16.0)], Some(3 * HOUR));

        let intervals = create_composite_schedule_at([&a, &b], anchor);
        assert_eq!(
            summary(&intervals, anchor),
            vec![(0, HOUR, 32.0), (HOUR, HOUR, 16.0), (2 * HOUR, HOUR, 16.0)]
        );
    }

    #[test]
    fn test_limit_at_shared_boundary_is_minimum() {
        let anchor = Utc::now();
        let a = profile(1, &[(0, 10.0)], Some(HOUR));
        let b = profile(2, &[(HOUR, 32.0)], Some(2 * HOUR));

        let intervals = create_composite_schedule_at([&a, &b], anchor);
        assert_eq!(
            summary(&intervals, anchor),
            vec![(0, HOUR, 10.0), (HOUR, HOUR, 10.0)]
        );
    }

    #[test]
    fn test_periods_within_one_profile() {
        let anchor = Utc::now();
        let p = profile(1, &[(0, 16.0), (1800, 8.0), (3600, 24.0)], Some(7200));

        let intervals = create_composite_schedule_at([&p], anchor);
        assert_eq!(
            summary(&intervals, anchor),
            vec![(0, 1800, 16.0), (1800, 1800, 8.0), (3600, 3600, 8.0)]
        );
        assert_eq!(intervals[2].end_time(), anchor + Duration::seconds(7200));
    }

    #[test]
    fn test_open_ended_last_period_has_no_interval() {
        let anchor = Utc::now();
        let p = profile(1, &[(0, 16.0), (HOUR, 8.0)], None);

        let intervals = create_composite_schedule_at([&p], anchor);
        assert_eq!(summary(&intervals, anchor), vec![(0, HOUR, 16.0)]);
    }

    #[test]
    fn test_gap_between_profiles_forms_interval() {
        let anchor = Utc::now();
        let a = profile(1, &[(0, 16.0)], Some(HOUR));
        let b = profile(2, &[(2 * HOUR, 8.0)], Some(3 * HOUR));

        let intervals = create_composite_schedule_at([&a, &b], anchor);
        assert_eq!(
            summary(&intervals, anchor),
            vec![(0, HOUR, 16.0), (HOUR, HOUR, 16.0), (2 * HOUR, HOUR, 8.0)]
        );
    }

    #[test]
    fn test_no_profiles() {
        assert!(create_composite_schedule(std::iter::empty()).is_empty());
    }

    fn arb_profile() -> impl Strategy<Value = ChargingProfile> {
        (
            prop::collection::vec((0i64..48, 1u32..64), 1..6),
            prop::option::of(1i64..60),
        )
            .prop_map(|(periods, duration)| {
                let periods: Vec<(i64, f64)> = periods
                    .into_iter()
                    .map(|(slot, limit)| (slot * 900, f64::from(limit)))
                    .collect();
                profile(1, &periods, duration.map(|d| d * 900))
            })
    }

    proptest! {
        #[test]
        fn prop_schedule_is_ordered_and_repeatable(
            profiles in prop::collection::vec(arb_profile(), 0..4)
        ) {
            let anchor = Utc::now();
            let first = create_composite_schedule_at(&profiles, anchor);
            let second = create_composite_schedule_at(&profiles, anchor);
            prop_assert_eq!(&first, &second);

            for interval in &first {
                prop_assert!(interval.duration > Duration::zero());
            }
            for (prev, next) in first.iter().tuple_windows() {
                prop_assert_eq!(prev.end_time(), next.start_time);
            }
        }

        #[test]
        fn prop_limits_come_from_input_periods(
            profiles in prop::collection::vec(arb_profile(), 1..4)
        ) {
            let anchor = Utc::now();
            let limits: Vec<f64> = profiles
                .iter()
                .flat_map(|p| p.charging_schedule.charging_schedule_period.iter())
                .map(|p| p.limit)
                .collect();
            for interval in create_composite_schedule_at(&profiles, anchor) {
                prop_assert!(limits.contains(&interval.limit));
            }
        }
    }
}
