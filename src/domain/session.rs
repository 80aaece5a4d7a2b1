//! # Charging Session
//!
//! Bookkeeping for a single energy transfer on one connector: who started it,
//! under which transaction id, and the meter samples collected while it ran.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Measurand, MeterSample};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already active")]
    SessionAlreadyActive,
    #[error("invalid transaction id")]
    InvalidTransactionId,
    #[error("invalid tag id")]
    InvalidTagId,
}

/// Charging session state.
///
/// A session is active iff `is_active` is set; while active the transaction
/// and tag ids are non-empty and `started` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    is_active: bool,
    transaction_id: String,
    tag_id: String,
    started: Option<DateTime<Utc>>,
    consumption: Vec<MeterSample>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an active session from previously persisted parts.
    pub fn resumed(
        transaction_id: impl Into<String>,
        tag_id: impl Into<String>,
        started: Option<DateTime<Utc>>,
        consumption: Vec<MeterSample>,
    ) -> Self {
        Self {
            is_active: true,
            transaction_id: transaction_id.into(),
            tag_id: tag_id.into(),
            started,
            consumption,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn tag_id(&self) -> &str {
        &self.tag_id
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn consumption(&self) -> &[MeterSample] {
        &self.consumption
    }

    /// Checks whether a session could be started with these ids.
    pub fn check_start(&self, transaction_id: &str, tag_id: &str) -> Result<(), SessionError> {
        if self.is_active {
            return Err(SessionError::SessionAlreadyActive);
        }
        if transaction_id.is_empty() || !transaction_id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(SessionError::InvalidTransactionId);
        }
        if tag_id.is_empty() {
            return Err(SessionError::InvalidTagId);
        }
        Ok(())
    }

    pub fn start_session(
        &mut self,
        transaction_id: &str,
        tag_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.check_start(transaction_id, tag_id)?;
        self.is_active = true;
        self.transaction_id = transaction_id.to_string();
        self.tag_id = tag_id.to_string();
        self.started = Some(now);
        self.consumption.clear();
        Ok(())
    }

    /// Deactivates the session. Samples stay until the next start.
    pub fn end_session(&mut self) {
        self.is_active = false;
        self.transaction_id.clear();
        self.tag_id.clear();
        self.started = None;
    }

    /// Appends samples. Ignored unless the session is active.
    pub fn add_samples(&mut self, samples: impl IntoIterator<Item = MeterSample>) {
        if self.is_active {
            self.consumption.extend(samples);
        }
    }

    pub fn add_sample(&mut self, sample: MeterSample) {
        self.add_samples(std::iter::once(sample));
    }

    /// Mean power in watts over every sample that carries either an explicit
    /// power value or both current and voltage.
    pub fn calculate_avg_power(&self) -> f64 {
        let powers: Vec<f64> = self.consumption.iter().filter_map(sample_power).collect();
        if powers.is_empty() {
            return 0.0;
        }
        powers.iter().sum::<f64>() / powers.len() as f64
    }

    /// Energy estimate in watt-seconds: average power times elapsed time.
    pub fn calculate_energy_consumption_with_avg_power(&self, now: DateTime<Utc>) -> f64 {
        let Some(started) = self.started else {
            return 0.0;
        };
        let elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
        if elapsed < 1.0 {
            return 0.0;
        }
        self.calculate_avg_power() * elapsed
    }

    /// Sum of explicit energy samples in watt-hours. Exported energy counts
    /// negatively.
    pub fn calculate_energy_consumption(&self) -> f64 {
        self.consumption
            .iter()
            .flat_map(|sample| sample.values.iter())
            .filter(|value| value.measurand.is_energy() && value.value.is_finite())
            .map(|value| {
                if value.measurand.is_export() {
                    -value.base_value()
                } else {
                    value.base_value()
                }
            })
            .sum()
    }
}

fn sample_power(sample: &MeterSample) -> Option<f64> {
    let explicit: Vec<f64> = sample
        .values
        .iter()
        .filter(|v| v.measurand.is_power() && v.value.is_finite())
        .map(|v| {
            if v.measurand == Measurand::PowerActiveExport {
                -v.base_value()
            } else {
                v.base_value()
            }
        })
        .collect();
    if !explicit.is_empty() {
        return Some(explicit.iter().sum());
    }

    let current = sample.value_of(Measurand::is_current)?.base_value();
    let voltage = sample.value_of(|m| *m == Measurand::Voltage)?.base_value();
    let power = current * voltage;
    power.is_finite().then_some(power)
}
