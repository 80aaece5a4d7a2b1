//! # Connector
//!
//! State machine for one socket of an EVSE. A connector owns its relay,
//! optional power meter and the current charging session.
//!
//! Two locks guard it. `transition` serializes whole operations, including
//! persistence of the result. `state` covers the in-memory fields and is held
//! only while they change together with the matching notification, never
//! across storage I/O. Readers and the periodic sampler take only `state`.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::notifications::{publish, MeterValueNotification, StatusNotification};
use crate::controller::scheduler::Scheduler;
use crate::domain::{
    ConnectorStatus, ErrorCode, Measurand, MeterSample, SampledValue, Session, SessionError,
    StopReason,
};
use crate::hardware::{PowerMeter, Relay};
use crate::repo::{ConnectorRepository, PersistedConnector};

pub const DEFAULT_MAX_CHARGING_TIME_MINUTES: i64 = 180;
const NO_RESERVATION: i32 = -1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("invalid evse id {0}")]
    InvalidEvseId(i32),
    #[error("invalid connector id {0}")]
    InvalidConnectorId(i32),
    #[error("invalid reservation id {0}")]
    InvalidReservationId(i32),
    #[error("invalid connector status {0}")]
    InvalidConnectorStatus(String),
    #[error("session time limit exceeded ({elapsed_minutes} min)")]
    SessionTimeLimitExceeded { elapsed_minutes: i64 },
    #[error("saved session has no start time")]
    MissingSessionStart,
    #[error("connector not charging")]
    NotCharging,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ConnectorError {
    fn status(status: ConnectorStatus) -> Self {
        Self::InvalidConnectorStatus(status.to_string())
    }
}

/// Timing of a resumed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumedSession {
    pub elapsed_minutes: i64,
    pub remaining_minutes: i64,
}

/// Periodic power meter sampling while charging.
#[derive(Clone)]
pub struct SamplingSettings {
    pub scheduler: Arc<Scheduler>,
    pub interval: Duration,
    pub measurands: Vec<Measurand>,
}

#[derive(Debug)]
struct ConnectorState {
    status: ConnectorStatus,
    error_code: ErrorCode,
    reservation_id: i32,
    reservation_tag_id: Option<String>,
    session: Session,
}

#[derive(Default)]
struct Channels {
    status: Option<mpsc::Sender<StatusNotification>>,
    meter_values: Option<mpsc::Sender<MeterValueNotification>>,
}

pub struct Connector {
    evse_id: i32,
    connector_id: i32,
    connector_type: String,
    max_charging_time: i64,
    relay: Box<dyn Relay>,
    power_meter: Option<Box<dyn PowerMeter>>,
    sampling: Option<SamplingSettings>,
    repository: Option<ConnectorRepository>,
    channels: RwLock<Channels>,
    transition: Mutex<()>,
    state: Mutex<ConnectorState>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("evse_id", &self.evse_id)
            .field("connector_id", &self.connector_id)
            .field("connector_type", &self.connector_type)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates an `Available` connector with its relay switched off.
    /// A non-positive charging time limit falls back to 180 minutes.
    pub fn new(
        evse_id: i32,
        connector_id: i32,
        connector_type: impl Into<String>,
        relay: Box<dyn Relay>,
        power_meter: Option<Box<dyn PowerMeter>>,
        max_charging_time_minutes: i64,
    ) -> Result<Self, ConnectorError> {
        if evse_id <= 0 {
            return Err(ConnectorError::InvalidEvseId(evse_id));
        }
        if connector_id <= 0 {
            return Err(ConnectorError::InvalidConnectorId(connector_id));
        }
        let max_charging_time = if max_charging_time_minutes <= 0 {
            DEFAULT_MAX_CHARGING_TIME_MINUTES
        } else {
            max_charging_time_minutes
        };
        let connector_type = connector_type.into();

        info!(
            evse_id,
            connector_id,
            connector_type = %connector_type,
            max_charging_time,
            has_power_meter = power_meter.is_some(),
            "creating connector"
        );
        relay.disable();

        Ok(Self {
            evse_id,
            connector_id,
            connector_type,
            max_charging_time,
            relay,
            power_meter,
            sampling: None,
            repository: None,
            channels: RwLock::new(Channels::default()),
            transition: Mutex::new(()),
            state: Mutex::new(ConnectorState {
                status: ConnectorStatus::Available,
                error_code: ErrorCode::NoError,
                reservation_id: NO_RESERVATION,
                reservation_tag_id: None,
                session: Session::new(),
            }),
        })
    }

    pub fn with_repository(mut self, repository: ConnectorRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Sampling only takes effect when a power meter is attached.
    pub fn with_sampling(mut self, sampling: SamplingSettings) -> Self {
        self.sampling = Some(sampling);
        self
    }

    pub fn set_notification_channel(&self, tx: mpsc::Sender<StatusNotification>) {
        self.channels.write().status = Some(tx);
    }

    pub fn set_meter_values_channel(&self, tx: mpsc::Sender<MeterValueNotification>) {
        self.channels.write().meter_values = Some(tx);
    }

    // ------------------------------------------------------------------------
    // Charging
    // ------------------------------------------------------------------------

    /// Starts a session and switches power on. Allowed from `Available` or
    /// `Preparing`.
    pub fn start_charging(
        self: &Arc<Self>,
        transaction_id: &str,
        tag_id: &str,
    ) -> Result<(), ConnectorError> {
        let _transition = self.transition.lock();
        debug!(
            evse_id = self.evse_id,
            connector_id = self.connector_id,
            transaction_id,
            tag_id,
            "starting charging"
        );

        let record = {
            let mut state = self.state.lock();
            if !matches!(
                state.status,
                ConnectorStatus::Available | ConnectorStatus::Preparing
            ) {
                return Err(ConnectorError::status(state.status));
            }
            state.session.check_start(transaction_id, tag_id)?;

            self.change_status(&mut state, ConnectorStatus::Preparing, ErrorCode::NoError);
            state
                .session
                .start_session(transaction_id, tag_id, Utc::now())?;
            self.relay.enable();
            self.change_status(&mut state, ConnectorStatus::Charging, ErrorCode::NoError);
            self.record(&state)
        };

        self.persist(&record);
        self.schedule_sampling();
        info!(
            evse_id = self.evse_id,
            connector_id = self.connector_id,
            transaction_id,
            "charging started"
        );
        Ok(())
    }

    /// Recovers a session that was running before a restart.
    ///
    /// Sessions at or past the charging time limit are refused with
    /// [`ConnectorError::SessionTimeLimitExceeded`] carrying the limit as the
    /// elapsed time; the caller is expected to stop the connector.
    pub fn resume_charging(
        self: &Arc<Self>,
        saved: &Session,
    ) -> Result<ResumedSession, ConnectorError> {
        let _transition = self.transition.lock();

        let started = saved.started().ok_or(ConnectorError::MissingSessionStart)?;
        let elapsed_minutes = (Utc::now() - started).num_minutes();
        if elapsed_minutes >= self.max_charging_time {
            return Err(ConnectorError::SessionTimeLimitExceeded {
                elapsed_minutes: self.max_charging_time,
            });
        }

        let record = {
            let mut state = self.state.lock();
            if !matches!(
                state.status,
                ConnectorStatus::Charging | ConnectorStatus::Preparing
            ) {
                return Err(ConnectorError::status(state.status));
            }
            state
                .session
                .start_session(saved.transaction_id(), saved.tag_id(), started)?;
            state.session.add_samples(saved.consumption().iter().cloned());
            self.relay.enable();
            self.record(&state)
        };

        self.persist(&record);
        self.schedule_sampling();
        info!(
            evse_id = self.evse_id,
            connector_id = self.connector_id,
            transaction_id = saved.transaction_id(),
            elapsed_minutes,
            "charging resumed"
        );
        Ok(ResumedSession {
            elapsed_minutes,
            remaining_minutes: self.max_charging_time - elapsed_minutes,
        })
    }

    /// Ends the session and switches power off. The resulting status depends
    /// on `reason`: `EVDisconnected` suspends, `UnlockCommand` makes the
    /// connector unavailable, anything else passes through `Finishing` back
    /// to `Available`.
    pub fn stop_charging(&self, reason: StopReason) -> Result<(), ConnectorError> {
        let _transition = self.transition.lock();

        let record = {
            let mut state = self.state.lock();
            if !matches!(
                state.status,
                ConnectorStatus::Charging | ConnectorStatus::Preparing
            ) {
                return Err(ConnectorError::NotCharging);
            }
            state.session.end_session();
            self.relay.disable();

            match reason {
                StopReason::EVDisconnected => {
                    self.change_status(
                        &mut state,
                        ConnectorStatus::SuspendedEVSE,
                        ErrorCode::NoError,
                    )
                }
                StopReason::UnlockCommand => {
                    self.change_status(
                        &mut state,
                        ConnectorStatus::Unavailable,
                        ErrorCode::NoError,
                    )
                }
                _ => {
                    self.change_status(
                        &mut state,
                        ConnectorStatus::Finishing,
                        ErrorCode::NoError,
                    );
                    self.change_status(
                        &mut state,
                        ConnectorStatus::Available,
                        ErrorCode::NoError,
                    );
                }
            }
            self.record(&state)
        };

        self.cancel_sampling();
        self.persist(&record);
        info!(
            evse_id = self.evse_id,
            connector_id = self.connector_id,
            %reason,
            "charging stopped"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------------

    pub fn reserve_connector(
        &self,
        reservation_id: i32,
        tag_id: &str,
    ) -> Result<(), ConnectorError> {
        if reservation_id <= 0 {
            return Err(ConnectorError::InvalidReservationId(reservation_id));
        }
        let _transition = self.transition.lock();

        let record = {
            let mut state = self.state.lock();
            if state.status != ConnectorStatus::Available {
                return Err(ConnectorError::status(state.status));
            }
            state.reservation_id = reservation_id;
            state.reservation_tag_id = Some(tag_id.to_string()).filter(|t| !t.is_empty());
            self.change_status(&mut state, ConnectorStatus::Reserved, ErrorCode::NoError);
            self.record(&state)
        };

        self.persist(&record);
        debug!(
            evse_id = self.evse_id,
            connector_id = self.connector_id,
            reservation_id,
            "connector reserved"
        );
        Ok(())
    }

    pub fn remove_reservation(&self) -> Result<(), ConnectorError> {
        let _transition = self.transition.lock();

        let record = {
            let mut state = self.state.lock();
            if state.status != ConnectorStatus::Reserved {
                return Err(ConnectorError::status(state.status));
            }
            self.change_status(&mut state, ConnectorStatus::Available, ErrorCode::NoError);
            self.record(&state)
        };

        self.persist(&record);
        Ok(())
    }

    /// Restores a reservation read back from storage.
    pub(crate) fn restore_reservation(&self, reservation_id: i32) {
        let mut state = self.state.lock();
        if state.status == ConnectorStatus::Reserved && reservation_id > 0 {
            state.reservation_id = reservation_id;
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn set_status(&self, status: ConnectorStatus, error_code: ErrorCode) {
        let _transition = self.transition.lock();
        let record = {
            let mut state = self.state.lock();
            self.change_status(&mut state, status, error_code);
            self.record(&state)
        };
        self.persist(&record);
    }

    /// Status change on the restore path. The stored record is left as it is
    /// until the next operation persists the connector.
    pub(crate) fn restore_status(&self, status: ConnectorStatus, error_code: ErrorCode) {
        let _transition = self.transition.lock();
        let mut state = self.state.lock();
        self.change_status(&mut state, status, error_code);
    }

    /// Puts a saved session back in place without touching storage, so a
    /// following stop records its samples.
    pub(crate) fn restore_session(&self, saved: &Session) {
        let _transition = self.transition.lock();
        self.state.lock().session = saved.clone();
    }

    /// Applies a status change and emits its notification. Leaving
    /// `Reserved` drops the reservation.
    fn change_status(
        &self,
        state: &mut ConnectorState,
        status: ConnectorStatus,
        error_code: ErrorCode,
    ) {
        debug!(
            evse_id = self.evse_id,
            connector_id = self.connector_id,
            from = %state.status,
            to = %status,
            %error_code,
            "status change"
        );
        state.status = status;
        state.error_code = error_code;
        if status != ConnectorStatus::Reserved {
            state.reservation_id = NO_RESERVATION;
            state.reservation_tag_id = None;
        }

        publish(
            self.channels.read().status.as_ref(),
            StatusNotification {
                evse_id: self.evse_id,
                connector_id: self.connector_id,
                status,
                error_code,
                timestamp: Utc::now(),
            },
        );
    }

    fn record(&self, state: &ConnectorState) -> PersistedConnector {
        PersistedConnector {
            evse_id: self.evse_id,
            connector_id: self.connector_id,
            status: state.status.to_string(),
            error_code: state.error_code,
            reservation_id: state.reservation_id,
            session: state.session.clone(),
        }
    }

    fn persist(&self, record: &PersistedConnector) {
        let Some(repository) = &self.repository else {
            return;
        };
        if let Err(e) = repository.save(record) {
            error!(
                evse_id = self.evse_id,
                connector_id = self.connector_id,
                status = %record.status,
                error = %e,
                "failed to persist connector state"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Metering
    // ------------------------------------------------------------------------

    pub fn sampling_tag(&self) -> String {
        format!("Evse{}Connector{}Sampling", self.evse_id, self.connector_id)
    }

    fn schedule_sampling(self: &Arc<Self>) {
        let (Some(sampling), Some(_)) = (&self.sampling, &self.power_meter) else {
            return;
        };
        let connector = Arc::downgrade(self);
        let measurands = sampling.measurands.clone();
        sampling
            .scheduler
            .every(self.sampling_tag(), sampling.interval, move || {
                let connector = connector.upgrade().ok_or("connector dropped")?;
                connector.sample_power_meter(&measurands);
                Ok::<(), &str>(())
            });
    }

    fn cancel_sampling(&self) {
        if let Some(sampling) = &self.sampling {
            sampling.scheduler.cancel(&self.sampling_tag());
        }
    }

    /// Reads the requested measurands and appends the sample to the active
    /// session. Returns `None` when no power meter is attached.
    pub fn sample_power_meter(&self, measurands: &[Measurand]) -> Option<MeterSample> {
        let meter = self.power_meter.as_ref()?;

        let values: Vec<SampledValue> = measurands
            .iter()
            .filter_map(|measurand| {
                let value = if measurand.is_energy() {
                    meter.get_energy()
                } else if measurand.is_power() {
                    meter.get_power()
                } else if measurand.is_current() {
                    meter.get_current()
                } else {
                    meter.get_voltage()
                };
                if !value.is_finite() {
                    warn!(
                        evse_id = self.evse_id,
                        connector_id = self.connector_id,
                        %measurand,
                        "discarding invalid meter reading"
                    );
                    return None;
                }
                Some(SampledValue::new(*measurand, value))
            })
            .collect();
        let sample = MeterSample::new(Utc::now(), values);

        let transaction_id = {
            let mut state = self.state.lock();
            state.session.add_sample(sample.clone());
            Some(state.session.transaction_id().to_string()).filter(|t| !t.is_empty())
        };

        publish(
            self.channels.read().meter_values.as_ref(),
            MeterValueNotification {
                evse_id: self.evse_id,
                connector_id: self.connector_id,
                transaction_id,
                sample: sample.clone(),
            },
        );
        Some(sample)
    }

    /// Energy of the running session estimated from its average power, in
    /// watt-seconds.
    pub fn calculate_session_avg_energy_consumption(&self) -> f64 {
        self.state
            .lock()
            .session
            .calculate_energy_consumption_with_avg_power(Utc::now())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn evse_id(&self) -> i32 {
        self.evse_id
    }

    pub fn connector_id(&self) -> i32 {
        self.connector_id
    }

    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    pub fn max_charging_time(&self) -> i64 {
        self.max_charging_time
    }

    pub fn has_power_meter(&self) -> bool {
        self.power_meter.is_some()
    }

    pub fn status(&self) -> (ConnectorStatus, ErrorCode) {
        let state = self.state.lock();
        (state.status, state.error_code)
    }

    fn status_is(&self, status: ConnectorStatus) -> bool {
        self.state.lock().status == status
    }

    pub fn is_available(&self) -> bool {
        self.status_is(ConnectorStatus::Available)
    }

    pub fn is_preparing(&self) -> bool {
        self.status_is(ConnectorStatus::Preparing)
    }

    pub fn is_charging(&self) -> bool {
        self.status_is(ConnectorStatus::Charging)
    }

    pub fn is_reserved(&self) -> bool {
        self.status_is(ConnectorStatus::Reserved)
    }

    pub fn is_unavailable(&self) -> bool {
        self.status_is(ConnectorStatus::Unavailable)
    }

    pub fn tag_id(&self) -> String {
        self.state.lock().session.tag_id().to_string()
    }

    pub fn transaction_id(&self) -> String {
        self.state.lock().session.transaction_id().to_string()
    }

    pub fn reservation_id(&self) -> i32 {
        self.state.lock().reservation_id
    }

    pub fn reservation_tag_id(&self) -> Option<String> {
        self.state.lock().reservation_tag_id.clone()
    }

    /// Copy of the current session.
    pub fn session(&self) -> Session {
        self.state.lock().session.clone()
    }
}
