use serde::{Deserialize, Serialize};

use super::keys;
use super::store::{Records, Store, StoreError};
use crate::domain::{ConnectorStatus, ErrorCode, Session};

/// Durable record of one connector, enough to rebuild it after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConnector {
    pub evse_id: i32,
    pub connector_id: i32,
    /// Kept as text so records written by other versions still load.
    pub status: String,
    #[serde(default)]
    pub error_code: ErrorCode,
    #[serde(default = "no_reservation")]
    pub reservation_id: i32,
    #[serde(default)]
    pub session: Session,
}

fn no_reservation() -> i32 {
    -1
}

impl PersistedConnector {
    pub fn new(evse_id: i32, connector_id: i32) -> Self {
        Self {
            evse_id,
            connector_id,
            status: ConnectorStatus::Available.to_string(),
            error_code: ErrorCode::NoError,
            reservation_id: no_reservation(),
            session: Session::default(),
        }
    }
}

/// Connector records, one per `(evse, connector)` key.
#[derive(Debug, Clone)]
pub struct ConnectorRepository {
    store: Store,
}

impl ConnectorRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Overwrites the connector's record.
    pub fn save(&self, record: &PersistedConnector) -> Result<(), StoreError> {
        let key = keys::connector(record.evse_id, record.connector_id);
        self.store.update(|txn| txn.put_json(&key, record))
    }

    pub fn load(
        &self,
        evse_id: i32,
        connector_id: i32,
    ) -> Result<Option<PersistedConnector>, StoreError> {
        self.store
            .view(|txn| txn.get_json(&keys::connector(evse_id, connector_id)))
    }

    pub fn load_all(&self) -> Result<Vec<PersistedConnector>, StoreError> {
        self.store.view(|txn| {
            Ok(txn
                .scan_json::<PersistedConnector>(keys::CONNECTOR_PREFIX)?
                .into_iter()
                .map(|(_, record)| record)
                .collect())
        })
    }
}
