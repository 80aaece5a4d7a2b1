//! # Charging Profiles
//!
//! Power or current limits over time, stacked per purpose.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum ChargingProfilePurpose {
    ChargePointMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ChargingProfileKind {
    Absolute,
    Recurring,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum RecurrencyKind {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ChargingRateUnit {
    W,
    A,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    /// Seconds from the start of the schedule
    pub start_period: i64,
    pub limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
}

impl ChargingSchedulePeriod {
    pub fn new(start_period: i64, limit: f64) -> Self {
        Self {
            start_period,
            limit,
            number_phases: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    pub charging_rate_unit: ChargingRateUnit,
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f64>,
}

/// A period resolved against the schedule: offsets from the schedule start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodSpan {
    pub start: Duration,
    /// `None` when the last period has no schedule duration to end it.
    pub end: Option<Duration>,
    pub limit: f64,
}

impl ChargingSchedule {
    /// Periods with their end offsets. A period ends where the next one
    /// starts; the last one ends at the schedule duration. Periods starting at
    /// or past the duration are dropped.
    pub fn period_spans(&self) -> Vec<PeriodSpan> {
        let mut periods: Vec<&ChargingSchedulePeriod> =
            self.charging_schedule_period.iter().collect();
        periods.sort_by_key(|p| p.start_period);

        let duration = self.duration.map(Duration::seconds);
        periods
            .iter()
            .enumerate()
            .map(|(i, period)| {
                let start = Duration::seconds(period.start_period);
                let end = periods
                    .get(i + 1)
                    .map(|next| Duration::seconds(next.start_period))
                    .or(duration)
                    .map(|end| duration.map_or(end, |d| end.min(d)));
                PeriodSpan {
                    start,
                    end,
                    limit: period.limit,
                }
            })
            .filter(|span| span.end.map_or(true, |end| end > span.start))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub charging_profile_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    pub stack_level: i32,
    pub charging_profile_purpose: ChargingProfilePurpose,
    pub charging_profile_kind: ChargingProfileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrency_kind: Option<RecurrencyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    pub charging_schedule: ChargingSchedule,
}

impl ChargingProfile {
    /// Whether the profile applies at `now`. Transaction profiles always do;
    /// others when no validity window is set or `now` lies inside it.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.charging_profile_purpose == ChargingProfilePurpose::TxProfile {
            return true;
        }
        self.valid_from.map_or(true, |from| from <= now)
            && self.valid_to.map_or(true, |to| now <= to)
    }
}

/// Effective limit over one contiguous time interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleInterval {
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub limit: f64,
}

impl ScheduleInterval {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(periods: &[(i64, f64)], duration: Option<i64>) -> ChargingSchedule {
        ChargingSchedule {
            charging_rate_unit: ChargingRateUnit::A,
            charging_schedule_period: periods
                .iter()
                .map(|(start, limit)| ChargingSchedulePeriod::new(*start, *limit))
                .collect(),
            duration,
            start_schedule: None,
            min_charging_rate: None,
        }
    }

    #[test]
    fn test_period_spans_end_at_next_start() {
        let spans = schedule(&[(0, 32.0), (600, 16.0)], Some(1200)).period_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].end, Some(Duration::seconds(600)));
        assert_eq!(spans[1].start, Duration::seconds(600));
        assert_eq!(spans[1].end, Some(Duration::seconds(1200)));
    }

    #[test]
    fn test_last_span_is_open_without_duration() {
        let spans = schedule(&[(0, 10.0)], None).period_spans();
        assert_eq!(spans[0].end, None);
    }

    #[test]
    fn test_periods_past_duration_are_dropped() {
        let spans = schedule(&[(0, 10.0), (3600, 6.0)], Some(1800)).period_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end, Some(Duration::seconds(1800)));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let mut profile = ChargingProfile {
            charging_profile_id: 1,
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurpose::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: Some(now + Duration::hours(1)),
            valid_to: None,
            charging_schedule: schedule(&[(0, 16.0)], None),
        };
        assert!(!profile.is_valid_at(now));

        profile.charging_profile_purpose = ChargingProfilePurpose::TxProfile;
        assert!(profile.is_valid_at(now));

        profile.charging_profile_purpose = ChargingProfilePurpose::ChargePointMaxProfile;
        profile.valid_from = Some(now - Duration::hours(1));
        profile.valid_to = Some(now + Duration::hours(1));
        assert!(profile.is_valid_at(now));
    }
}
