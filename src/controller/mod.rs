pub mod reader;
pub mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::TagManager;
use crate::config::Config;
use crate::evse::{ConnectorManager, MeterValueNotification, SamplingSettings, StatusNotification};
use crate::hardware::{DeviceFactory, Display, HardwareError, Indicator};
use crate::repo::Repositories;
use crate::smart_charging::SmartChargingManager;

pub use reader::{run_reader_loop, TagHandler, TagOutcome};
pub use scheduler::{Scheduler, TaskStatus};

/// Receiving ends of the notification channels shared by all connectors.
pub struct Notifications {
    pub status: mpsc::Receiver<StatusNotification>,
    pub meter_values: mpsc::Receiver<MeterValueNotification>,
}

/// Every long-lived component of the charge point, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub repos: Repositories,
    pub scheduler: Arc<Scheduler>,
    pub connectors: Arc<ConnectorManager>,
    pub tags: Arc<TagManager>,
    pub smart_charging: Arc<SmartChargingManager>,
    pub display: Option<Arc<dyn Display>>,
    pub indicator: Option<Arc<dyn Indicator>>,
}

impl AppState {
    /// Must be called from within a Tokio runtime.
    pub fn new(cfg: Config) -> Result<(Self, Notifications)> {
        let repos = Repositories::new(&cfg.storage)?;
        Ok(Self::with_repositories(cfg, repos))
    }

    pub fn with_repositories(cfg: Config, repos: Repositories) -> (Self, Notifications) {
        let scheduler = Arc::new(Scheduler::new());
        let (status_tx, status_rx) = mpsc::channel(cfg.charge_point.notification_buffer);
        let (meter_values_tx, meter_values_rx) =
            mpsc::channel(cfg.charge_point.notification_buffer);

        let connectors = ConnectorManager::new(Some(status_tx))
            .with_meter_values_channel(meter_values_tx)
            .with_repository(repos.connectors.clone())
            .with_sampling(SamplingSettings {
                scheduler: scheduler.clone(),
                interval: cfg.sample_interval(),
                measurands: cfg.charge_point.meter_values_sampled_data.clone(),
            });
        let tags = TagManager::new(repos.store.clone(), &cfg.auth);
        let smart_charging =
            SmartChargingManager::new(repos.store.clone(), cfg.smart_charging.clone());

        let state = Self {
            display: DeviceFactory::create_display(&cfg.display),
            indicator: DeviceFactory::create_indicator(&cfg.indicator),
            connectors: Arc::new(connectors),
            tags: Arc::new(tags),
            smart_charging: Arc::new(smart_charging),
            scheduler,
            repos,
            cfg,
        };
        let notifications = Notifications {
            status: status_rx,
            meter_values: meter_values_rx,
        };
        (state, notifications)
    }

    /// Adds the configured connectors and replays their persisted state.
    /// Connectors that fail to build are skipped.
    pub fn load_connectors(&self) -> Result<usize> {
        if let Err(e) = self.connectors.add_connectors_from_configuration(
            self.cfg.charge_point.max_charging_time_minutes,
            &self.cfg.connectors,
        ) {
            warn!(error = %e, "some connectors could not be added");
        }
        let restored = self
            .connectors
            .restore_connectors()
            .context("restoring connector state")?;
        info!(
            connectors = self.connectors.len(),
            restored, "connectors loaded"
        );
        Ok(restored)
    }
}

pub fn spawn_controller_tasks(
    state: &AppState,
    notifications: Notifications,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(status_listener(
        notifications.status,
        state.display.clone(),
        state.indicator.clone(),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(meter_values_listener(
        notifications.meter_values,
        cancel.clone(),
    )));

    match DeviceFactory::create_tag_reader(&state.cfg.tag_reader) {
        Ok(reader) => {
            let handler = Arc::new(TagHandler::new(
                state.connectors.clone(),
                state.tags.clone(),
                state.display.clone(),
            ));
            tasks.push(tokio::spawn(run_reader_loop(reader, handler, cancel)));
        }
        Err(HardwareError::NotEnabled(_)) => info!("tag reader disabled"),
        Err(e) => warn!(error = %e, "tag reader unavailable"),
    }

    tasks
}

/// Forwards connector status changes to the indicator and display.
async fn status_listener(
    mut rx: mpsc::Receiver<StatusNotification>,
    display: Option<Arc<dyn Display>>,
    indicator: Option<Arc<dyn Indicator>>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            n = rx.recv() => match n {
                Some(n) => n,
                None => break,
            },
        };

        info!(
            evse_id = notification.evse_id,
            connector_id = notification.connector_id,
            status = %notification.status,
            error_code = %notification.error_code,
            "connector status changed"
        );
        if let Some(indicator) = &indicator {
            indicator.indicate(
                notification.evse_id,
                notification.connector_id,
                notification.status,
            );
        }
        if let Some(display) = &display {
            display.show(&[
                format!("Connector {}", notification.connector_id),
                notification.status.to_string(),
            ]);
        }
    }
    debug!("status listener stopped");
}

async fn meter_values_listener(
    mut rx: mpsc::Receiver<MeterValueNotification>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            n = rx.recv() => match n {
                Some(n) => debug!(
                    evse_id = n.evse_id,
                    connector_id = n.connector_id,
                    transaction_id = n.transaction_id.as_deref().unwrap_or(""),
                    values = n.sample.values.len(),
                    "meter values"
                ),
                None => break,
            },
        }
    }
    debug!("meter values listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectorStatus, ErrorCode};
    use crate::hardware::MockIndicator;
    use chrono::Utc;
    use figment::{
        providers::{Format, Toml},
        Figment,
    };
    use std::time::Duration;

    fn config() -> Config {
        Figment::from(Toml::string(
            r#"
            [charge_point]
            id = "CP-TEST"

            [[connectors]]
            evse_id = 1
            connector_id = 1

            [[connectors]]
            evse_id = 2
            connector_id = 1
            relay = { type = "gpio" }
            "#,
        ))
        .extract()
        .unwrap()
    }

    #[tokio::test]
    async fn test_state_loads_configured_connectors() {
        let (state, _notifications) = AppState::new(config()).unwrap();
        assert_eq!(state.load_connectors().unwrap(), 0);
        assert_eq!(state.connectors.len(), 1);
        assert!(state.connectors.find_connector(1, 1).is_some());
        assert_eq!(state.tags.get_auth_list_version().unwrap(), -1);
    }

    #[tokio::test]
    async fn test_status_listener_drives_indicator() {
        let mut indicator = MockIndicator::new();
        indicator
            .expect_indicate()
            .withf(|evse, connector, status| {
                *evse == 1 && *connector == 2 && *status == ConnectorStatus::Faulted
            })
            .times(1)
            .return_const(());

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(status_listener(
            rx,
            None,
            Some(Arc::new(indicator)),
            cancel.clone(),
        ));

        tx.send(StatusNotification {
            evse_id: 1,
            connector_id: 2,
            status: ConnectorStatus::Faulted,
            error_code: ErrorCode::InternalError,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
