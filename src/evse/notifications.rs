use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{ConnectorStatus, ErrorCode, MeterSample};

/// Emitted on every connector status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub evse_id: i32,
    pub connector_id: i32,
    pub status: ConnectorStatus,
    pub error_code: ErrorCode,
    pub timestamp: DateTime<Utc>,
}

/// Emitted for every power meter sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValueNotification {
    pub evse_id: i32,
    pub connector_id: i32,
    pub transaction_id: Option<String>,
    pub sample: MeterSample,
}

/// Non-blocking publish. A full or closed channel drops the message.
pub(crate) fn publish<T: std::fmt::Debug>(channel: Option<&mpsc::Sender<T>>, message: T) {
    let Some(tx) = channel else { return };
    if let Err(e) = tx.try_send(message) {
        match e {
            mpsc::error::TrySendError::Full(message) => {
                warn!(?message, "notification channel full, dropping message")
            }
            mpsc::error::TrySendError::Closed(_) => {}
        }
    }
}
