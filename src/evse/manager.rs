//! # Connector Manager
//!
//! Registry of every connector on the charge point, keyed by
//! `(evse_id, connector_id)`. Lookups scan in key order and return the first
//! match.

use parking_lot::RwLock;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::connector::{Connector, ConnectorError, SamplingSettings};
use super::notifications::{MeterValueNotification, StatusNotification};
use crate::config::ConnectorSettings;
use crate::domain::{ConnectorStatus, ErrorCode, StopReason};
use crate::hardware::{DeviceFactory, HardwareError};
use crate::repo::{ConnectorRepository, PersistedConnector, StoreError};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("connector {evse_id}/{connector_id} already exists")]
    AlreadyExists { evse_id: i32, connector_id: i32 },
    #[error("connector not found")]
    ConnectorNotFound,
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub struct ConnectorManager {
    connectors: RwLock<BTreeMap<(i32, i32), Arc<Connector>>>,
    status_tx: Option<mpsc::Sender<StatusNotification>>,
    meter_values_tx: Option<mpsc::Sender<MeterValueNotification>>,
    repository: Option<ConnectorRepository>,
    sampling: Option<SamplingSettings>,
}

impl ConnectorManager {
    /// Every connector added later publishes status changes on `status_tx`.
    pub fn new(status_tx: Option<mpsc::Sender<StatusNotification>>) -> Self {
        Self {
            connectors: RwLock::new(BTreeMap::new()),
            status_tx,
            meter_values_tx: None,
            repository: None,
            sampling: None,
        }
    }

    pub fn with_meter_values_channel(mut self, tx: mpsc::Sender<MeterValueNotification>) -> Self {
        self.meter_values_tx = Some(tx);
        self
    }

    /// Repository given to connectors built from settings and read on restore.
    pub fn with_repository(mut self, repository: ConnectorRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Sampling given to connectors built from settings.
    pub fn with_sampling(mut self, sampling: SamplingSettings) -> Self {
        self.sampling = Some(sampling);
        self
    }

    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.connectors.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.read().is_empty()
    }

    pub fn add_connector(&self, connector: Arc<Connector>) -> Result<(), ManagerError> {
        let evse_id = connector.evse_id();
        let connector_id = connector.connector_id();

        match self.connectors.write().entry((evse_id, connector_id)) {
            Entry::Occupied(_) => Err(ManagerError::AlreadyExists {
                evse_id,
                connector_id,
            }),
            Entry::Vacant(slot) => {
                if let Some(tx) = &self.status_tx {
                    connector.set_notification_channel(tx.clone());
                }
                if let Some(tx) = &self.meter_values_tx {
                    connector.set_meter_values_channel(tx.clone());
                }
                slot.insert(connector);
                debug!(evse_id, connector_id, "connector added");
                Ok(())
            }
        }
    }

    /// Builds a connector and its hardware from configuration and registers it.
    pub fn add_connector_from_settings(
        &self,
        max_charging_time_minutes: i64,
        settings: &ConnectorSettings,
    ) -> Result<Arc<Connector>, ManagerError> {
        let relay = DeviceFactory::create_relay(&settings.relay)?;
        let power_meter = DeviceFactory::create_power_meter(&settings.power_meter)?;

        let mut connector = Connector::new(
            settings.evse_id,
            settings.connector_id,
            settings.connector_type.clone(),
            relay,
            power_meter,
            max_charging_time_minutes,
        )?;
        if let Some(repository) = &self.repository {
            connector = connector.with_repository(repository.clone());
        }
        if let Some(sampling) = &self.sampling {
            connector = connector.with_sampling(sampling.clone());
        }

        let connector = Arc::new(connector);
        self.add_connector(connector.clone())?;
        Ok(connector)
    }

    /// Adds every configured connector, continuing past failures. Returns the
    /// last error seen.
    pub fn add_connectors_from_configuration(
        &self,
        max_charging_time_minutes: i64,
        settings: &[ConnectorSettings],
    ) -> Result<(), ManagerError> {
        let mut last_error = None;
        for connector in settings {
            if let Err(e) = self.add_connector_from_settings(max_charging_time_minutes, connector) {
                warn!(
                    evse_id = connector.evse_id,
                    connector_id = connector.connector_id,
                    error = %e,
                    "cannot add connector"
                );
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn find_connector(&self, evse_id: i32, connector_id: i32) -> Option<Arc<Connector>> {
        self.connectors.read().get(&(evse_id, connector_id)).cloned()
    }

    fn find_first(&self, predicate: impl Fn(&Connector) -> bool) -> Option<Arc<Connector>> {
        self.connectors
            .read()
            .values()
            .find(|c| predicate(c))
            .cloned()
    }

    pub fn find_available_connector(&self) -> Option<Arc<Connector>> {
        self.find_first(Connector::is_available)
    }

    pub fn find_connector_with_tag_id(&self, tag_id: &str) -> Option<Arc<Connector>> {
        if tag_id.is_empty() {
            return None;
        }
        self.find_first(|c| c.tag_id() == tag_id)
    }

    pub fn find_connector_with_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Option<Arc<Connector>> {
        if transaction_id.is_empty() {
            return None;
        }
        self.find_first(|c| c.transaction_id() == transaction_id)
    }

    pub fn find_connector_with_reservation_id(
        &self,
        reservation_id: i32,
    ) -> Option<Arc<Connector>> {
        if reservation_id <= 0 {
            return None;
        }
        self.find_first(|c| c.reservation_id() == reservation_id)
    }

    // ------------------------------------------------------------------------
    // Charging
    // ------------------------------------------------------------------------

    pub fn start_charging_connector(
        &self,
        evse_id: i32,
        connector_id: i32,
        tag_id: &str,
        transaction_id: &str,
    ) -> Result<(), ManagerError> {
        let connector = self
            .find_connector(evse_id, connector_id)
            .ok_or(ManagerError::ConnectorNotFound)?;
        connector.start_charging(transaction_id, tag_id)?;
        Ok(())
    }

    /// Stops the connector running `transaction_id`, or failing that the one
    /// charging for `tag_id`.
    pub fn stop_charging_connector(
        &self,
        tag_id: &str,
        transaction_id: &str,
        reason: StopReason,
    ) -> Result<(), ManagerError> {
        let connector = self
            .find_connector_with_transaction_id(transaction_id)
            .or_else(|| self.find_connector_with_tag_id(tag_id))
            .ok_or(ManagerError::ConnectorNotFound)?;
        connector.stop_charging(reason)?;
        Ok(())
    }

    /// Stops every connector, continuing past failures. Returns the last
    /// error seen.
    pub fn stop_all_connectors(&self, reason: StopReason) -> Result<(), ManagerError> {
        debug!(%reason, "stopping all connectors");
        let mut last_error = None;
        for connector in self.connectors() {
            if let Err(e) = connector.stop_charging(reason) {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), |e| Err(e.into()))
    }

    // ------------------------------------------------------------------------
    // Restore
    // ------------------------------------------------------------------------

    /// Replays a persisted status into the matching live connector.
    pub fn restore_connector_status(
        &self,
        persisted: &PersistedConnector,
    ) -> Result<(), ManagerError> {
        let connector = self
            .find_connector(persisted.evse_id, persisted.connector_id)
            .ok_or(ManagerError::ConnectorNotFound)?;
        let status = ConnectorStatus::from_str(&persisted.status)
            .map_err(|_| ConnectorError::InvalidConnectorStatus(persisted.status.clone()))?;
        debug!(
            evse_id = persisted.evse_id,
            connector_id = persisted.connector_id,
            previous_status = %status,
            "restoring connector status"
        );

        match status {
            ConnectorStatus::Available
            | ConnectorStatus::Finishing
            | ConnectorStatus::SuspendedEV
            | ConnectorStatus::SuspendedEVSE => {
                connector.set_status(status, persisted.error_code);
                Ok(())
            }
            ConnectorStatus::Reserved => {
                connector.set_status(status, persisted.error_code);
                connector.restore_reservation(persisted.reservation_id);
                Ok(())
            }
            ConnectorStatus::Preparing => {
                connector.restore_status(status, ErrorCode::NoError);
                let session = &persisted.session;
                if let Err(e) =
                    connector.start_charging(session.transaction_id(), session.tag_id())
                {
                    connector.set_status(ConnectorStatus::Available, ErrorCode::InternalError);
                    return Err(e.into());
                }
                Ok(())
            }
            ConnectorStatus::Charging => {
                connector.restore_status(status, ErrorCode::NoError);
                match connector.resume_charging(&persisted.session) {
                    Ok(resumed) => {
                        info!(
                            evse_id = persisted.evse_id,
                            connector_id = persisted.connector_id,
                            remaining_minutes = resumed.remaining_minutes,
                            "session resumed"
                        );
                    }
                    Err(e) => {
                        warn!(
                            evse_id = persisted.evse_id,
                            connector_id = persisted.connector_id,
                            error = %e,
                            "cannot resume session, stopping"
                        );
                        connector.restore_session(&persisted.session);
                        if let Err(e) = connector.stop_charging(StopReason::DeAuthorized) {
                            error!(
                                evse_id = persisted.evse_id,
                                connector_id = persisted.connector_id,
                                error = %e,
                                "cannot stop connector after failed resume"
                            );
                            connector
                                .set_status(ConnectorStatus::Faulted, ErrorCode::InternalError);
                        }
                    }
                }
                Ok(())
            }
            ConnectorStatus::Faulted => {
                connector.set_status(ConnectorStatus::Faulted, ErrorCode::InternalError);
                Ok(())
            }
            ConnectorStatus::Unavailable => {
                Err(ConnectorError::InvalidConnectorStatus(persisted.status.clone()).into())
            }
        }
    }

    /// Restores every persisted connector that is also registered. Failures
    /// are logged and skipped. Returns how many were restored.
    pub fn restore_connectors(&self) -> Result<usize, ManagerError> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };

        let mut restored = 0;
        for record in repository.load_all()? {
            if self.find_connector(record.evse_id, record.connector_id).is_none() {
                debug!(
                    evse_id = record.evse_id,
                    connector_id = record.connector_id,
                    "skipping persisted connector that is no longer configured"
                );
                continue;
            }
            match self.restore_connector_status(&record) {
                Ok(()) => restored += 1,
                Err(e) => warn!(
                    evse_id = record.evse_id,
                    connector_id = record.connector_id,
                    status = %record.status,
                    error = %e,
                    "cannot restore connector"
                ),
            }
        }
        info!(restored, "connectors restored");
        Ok(restored)
    }
}
