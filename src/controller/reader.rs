//! Tag reader worker: turns presented tags into charging starts and stops.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::TagManager;
use crate::domain::StopReason;
use crate::evse::{Connector, ConnectorManager};
use crate::hardware::{Display, TagReader};

/// What presenting a tag led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    Started {
        evse_id: i32,
        connector_id: i32,
        transaction_id: String,
    },
    Stopped {
        evse_id: i32,
        connector_id: i32,
    },
    Unauthorized,
    NoConnectorAvailable,
    Failed(String),
}

pub struct TagHandler {
    connectors: Arc<ConnectorManager>,
    tags: Arc<TagManager>,
    display: Option<Arc<dyn Display>>,
}

impl TagHandler {
    pub fn new(
        connectors: Arc<ConnectorManager>,
        tags: Arc<TagManager>,
        display: Option<Arc<dyn Display>>,
    ) -> Self {
        Self {
            connectors,
            tags,
            display,
        }
    }

    /// A tag that is charging somewhere stops that session. Otherwise an
    /// authorized tag starts charging on the connector reserved for it, or on
    /// the first available one.
    ///
    /// Touches storage, so call it off the async executor.
    pub fn handle_tag(&self, tag_id: &str) -> TagOutcome {
        debug!(tag_id, "tag presented");

        if let Some(connector) = self.connectors.find_connector_with_tag_id(tag_id) {
            return match connector.stop_charging(StopReason::Local) {
                Ok(()) => {
                    self.show(&["Charging stopped".to_string(), connector_label(&connector)]);
                    TagOutcome::Stopped {
                        evse_id: connector.evse_id(),
                        connector_id: connector.connector_id(),
                    }
                }
                Err(e) => {
                    warn!(tag_id, error = %e, "cannot stop charging");
                    TagOutcome::Failed(e.to_string())
                }
            };
        }

        if !self.tags.is_tag_authorized(tag_id) {
            info!(tag_id, "tag not authorized");
            self.show(&["Unauthorized".to_string(), tag_id.to_string()]);
            return TagOutcome::Unauthorized;
        }

        let connector = match self.reserved_for(tag_id) {
            Some(connector) => {
                if let Err(e) = connector.remove_reservation() {
                    warn!(tag_id, error = %e, "cannot release reservation");
                    return TagOutcome::Failed(e.to_string());
                }
                connector
            }
            None => match self.connectors.find_available_connector() {
                Some(connector) => connector,
                None => {
                    info!(tag_id, "no connector available");
                    self.show(&["No connector available".to_string()]);
                    return TagOutcome::NoConnectorAvailable;
                }
            },
        };

        let transaction_id = Uuid::new_v4().simple().to_string();
        match connector.start_charging(&transaction_id, tag_id) {
            Ok(()) => {
                self.show(&["Charging started".to_string(), connector_label(&connector)]);
                TagOutcome::Started {
                    evse_id: connector.evse_id(),
                    connector_id: connector.connector_id(),
                    transaction_id,
                }
            }
            Err(e) => {
                warn!(tag_id, error = %e, "cannot start charging");
                TagOutcome::Failed(e.to_string())
            }
        }
    }

    fn reserved_for(&self, tag_id: &str) -> Option<Arc<Connector>> {
        self.connectors
            .connectors()
            .into_iter()
            .find(|c| c.is_reserved() && c.reservation_tag_id().as_deref() == Some(tag_id))
    }

    fn show(&self, lines: &[String]) {
        if let Some(display) = &self.display {
            display.show(lines);
        }
    }
}

fn connector_label(connector: &Connector) -> String {
    format!("EVSE {} connector {}", connector.evse_id(), connector.connector_id())
}

/// Handles tags from `reader` until `cancel` fires or the reader stops.
pub async fn run_reader_loop(
    reader: Arc<dyn TagReader>,
    handler: Arc<TagHandler>,
    cancel: CancellationToken,
) {
    info!("tag reader loop started");
    let mut tags = reader.listen_for_tags(cancel.child_token());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            tag = tags.recv() => {
                let Some(tag_id) = tag else { break };
                let handler = handler.clone();
                match tokio::task::spawn_blocking(move || handler.handle_tag(&tag_id)).await {
                    Ok(outcome) => debug!(?outcome, "tag handled"),
                    Err(e) => error!(error = %e, "tag handler failed"),
                }
            }
        }
    }

    reader.cleanup();
    info!("tag reader loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::domain::{AuthorizationStatus, IdTagInfo};
    use crate::hardware::dummy::DummyRelay;
    use crate::hardware::MockDisplay;
    use crate::repo::Store;
    use std::time::Duration;

    fn handler(connectors: &[(i32, i32)], display: Option<Arc<dyn Display>>) -> TagHandler {
        let manager = ConnectorManager::new(None);
        for (evse_id, connector_id) in connectors {
            manager
                .add_connector(Arc::new(
                    Connector::new(
                        *evse_id,
                        *connector_id,
                        "Schuko",
                        Box::new(DummyRelay::default()),
                        None,
                        0,
                    )
                    .unwrap(),
                ))
                .unwrap();
        }
        let tags = TagManager::new(Store::in_memory().unwrap(), &AuthConfig::default());
        tags.add_tag("GOOD", IdTagInfo::accepted()).unwrap();
        tags.add_tag("BAD", IdTagInfo::new(AuthorizationStatus::Blocked))
            .unwrap();
        TagHandler::new(Arc::new(manager), Arc::new(tags), display)
    }

    #[test]
    fn test_tag_starts_then_stops_charging() {
        let handler = handler(&[(1, 1)], None);

        let TagOutcome::Started { transaction_id, .. } = handler.handle_tag("GOOD") else {
            panic!("expected a started session");
        };
        assert_eq!(transaction_id.len(), 32);
        assert!(transaction_id.chars().all(|c| c.is_ascii_alphanumeric()));

        let connector = handler.connectors.find_connector(1, 1).unwrap();
        assert!(connector.is_charging());
        assert_eq!(connector.transaction_id(), transaction_id);

        assert_eq!(
            handler.handle_tag("GOOD"),
            TagOutcome::Stopped {
                evse_id: 1,
                connector_id: 1
            }
        );
        assert!(connector.is_available());
    }

    #[test]
    fn test_unauthorized_tag_is_shown() {
        let mut display = MockDisplay::new();
        display
            .expect_show()
            .withf(|lines| lines.first().map(String::as_str) == Some("Unauthorized"))
            .times(2)
            .return_const(());

        let handler = handler(&[(1, 1)], Some(Arc::new(display)));
        assert_eq!(handler.handle_tag("BAD"), TagOutcome::Unauthorized);
        assert_eq!(handler.handle_tag("UNKNOWN"), TagOutcome::Unauthorized);
        assert!(handler.connectors.find_connector(1, 1).unwrap().is_available());
    }

    #[test]
    fn test_no_connector_available() {
        let handler = handler(&[(1, 1)], None);
        handler.tags.add_tag("OTHER", IdTagInfo::accepted()).unwrap();
        assert!(matches!(handler.handle_tag("OTHER"), TagOutcome::Started { .. }));
        assert_eq!(handler.handle_tag("GOOD"), TagOutcome::NoConnectorAvailable);
    }

    #[test]
    fn test_reserved_connector_is_used_for_its_tag() {
        let handler = handler(&[(1, 1), (1, 2)], None);
        handler
            .connectors
            .find_connector(1, 2)
            .unwrap()
            .reserve_connector(3, "GOOD")
            .unwrap();

        assert!(matches!(
            handler.handle_tag("GOOD"),
            TagOutcome::Started {
                connector_id: 2,
                ..
            }
        ));
        assert_eq!(handler.connectors.find_connector(1, 2).unwrap().reservation_id(), -1);
    }

    /// Reader fed by the test through a channel.
    struct ChannelReader {
        rx: parking_lot::Mutex<Option<tokio::sync::mpsc::Receiver<String>>>,
        cleaned_up: std::sync::atomic::AtomicBool,
    }

    impl TagReader for ChannelReader {
        fn listen_for_tags(
            &self,
            _cancel: CancellationToken,
        ) -> tokio::sync::mpsc::Receiver<String> {
            self.rx
                .lock()
                .take()
                .unwrap_or_else(|| tokio::sync::mpsc::channel(1).1)
        }

        fn reset(&self) {}

        fn cleanup(&self) {
            self.cleaned_up
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_reader_loop_handles_tags_until_cancelled() {
        let handler = Arc::new(handler(&[(1, 1)], None));
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let reader = Arc::new(ChannelReader {
            rx: parking_lot::Mutex::new(Some(rx)),
            cleaned_up: Default::default(),
        });
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_reader_loop(
            reader.clone(),
            handler.clone(),
            cancel.clone(),
        ));
        tx.send("GOOD".to_string()).await.unwrap();

        let connector = handler.connectors.find_connector(1, 1).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !connector.is_charging() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
        assert!(reader.cleaned_up.load(std::sync::atomic::Ordering::SeqCst));
    }
}
