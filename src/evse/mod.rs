//! Connectors and the registry that routes charging requests to them.

pub mod connector;
pub mod manager;
pub mod notifications;

pub use connector::{Connector, ConnectorError, ResumedSession, SamplingSettings};
pub use manager::{ConnectorManager, ManagerError};
pub use notifications::{MeterValueNotification, StatusNotification};
