//! # Hardware Abstractions
//!
//! Narrow interfaces to the devices a charge point drives. Concrete drivers
//! are chosen by [`factory::DeviceFactory`] from configuration; the dummy
//! variants in [`dummy`] stand in when no real device is attached.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::ConnectorStatus;

pub mod dummy;
pub mod factory;

pub use factory::DeviceFactory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("{device} driver `{kind}` is not available in this build")]
    DriverUnavailable { device: &'static str, kind: String },
    #[error("{0} is not enabled")]
    NotEnabled(&'static str),
}

/// Switches power to a connector.
#[cfg_attr(test, mockall::automock)]
pub trait Relay: Send + Sync {
    fn enable(&self);
    fn disable(&self);
}

/// Energy meter attached to a connector. Energy in Wh, power in W,
/// current in A, voltage in V.
#[cfg_attr(test, mockall::automock)]
pub trait PowerMeter: Send + Sync {
    fn reset(&self);
    fn get_energy(&self) -> f64;
    fn get_power(&self) -> f64;
    fn get_current(&self) -> f64;
    fn get_voltage(&self) -> f64;
}

/// RFID/NFC reader producing tag ids.
pub trait TagReader: Send + Sync {
    /// Starts reading and returns the stream of detected tag ids. The stream
    /// ends when `cancel` fires or [`TagReader::cleanup`] is called. Calling
    /// it again restarts reading on a fresh stream.
    fn listen_for_tags(&self, cancel: CancellationToken) -> mpsc::Receiver<String>;
    fn reset(&self);
    fn cleanup(&self);
}

/// Text display facing the driver.
#[cfg_attr(test, mockall::automock)]
pub trait Display: Send + Sync {
    fn show(&self, lines: &[String]);
    fn clear(&self);
}

/// Per-connector status light.
#[cfg_attr(test, mockall::automock)]
pub trait Indicator: Send + Sync {
    fn indicate(&self, evse_id: i32, connector_id: i32, status: ConnectorStatus);
}
