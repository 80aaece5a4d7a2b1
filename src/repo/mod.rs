use crate::config::StorageConfig;
use anyhow::{Context, Result};
use tracing::warn;

pub mod connectors;
pub mod keys;
pub mod store;

pub use connectors::{ConnectorRepository, PersistedConnector};
pub use store::{Records, Store, StoreError};

#[derive(Debug, Clone)]
pub struct Repositories {
    pub store: Store,
    pub connectors: ConnectorRepository,
}

impl Repositories {
    pub fn new(cfg: &StorageConfig) -> Result<Self> {
        let store = match &cfg.path {
            Some(path) => Store::open(path)
                .with_context(|| format!("opening record store at {}", path.display()))?,
            None => {
                warn!("no storage path configured, state will not survive a restart");
                Store::in_memory().context("creating in-memory record store")?
            }
        };
        Ok(Self::with_store(store))
    }

    pub fn with_store(store: Store) -> Self {
        Self {
            connectors: ConnectorRepository::new(store.clone()),
            store,
        }
    }
}
