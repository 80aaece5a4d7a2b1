use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::dummy::{DummyPowerMeter, DummyRelay, DummyTagReader, LogDisplay, LogIndicator};
use super::{Display, HardwareError, Indicator, PowerMeter, Relay, TagReader};
use crate::config::{
    DisplaySettings, DisplayType, IndicatorSettings, IndicatorType, PowerMeterSettings,
    PowerMeterType, RelaySettings, RelayType, TagReaderSettings, TagReaderType,
};

/// Builds device drivers from their settings.
///
/// Power switching and metering never fall back to a stand-in: a connector
/// whose relay or meter driver is missing fails to build. Peripherals that
/// only face the user (reader, display, indicator) fall back to the logging
/// variants.
pub struct DeviceFactory;

impl DeviceFactory {
    pub fn create_relay(settings: &RelaySettings) -> Result<Box<dyn Relay>, HardwareError> {
        match settings.kind {
            RelayType::Dummy => Ok(Box::new(DummyRelay::new(settings.pin, settings.inverse_logic))),
            RelayType::Gpio => Err(HardwareError::DriverUnavailable {
                device: "relay",
                kind: "gpio".to_string(),
            }),
        }
    }

    /// `Ok(None)` when the meter is disabled.
    pub fn create_power_meter(
        settings: &PowerMeterSettings,
    ) -> Result<Option<Box<dyn PowerMeter>>, HardwareError> {
        if !settings.enabled {
            return Ok(None);
        }
        info!(kind = ?settings.kind, "creating power meter");
        match settings.kind {
            PowerMeterType::Dummy => Ok(Some(Box::new(DummyPowerMeter::default()))),
            PowerMeterType::Cs5460a => Err(HardwareError::DriverUnavailable {
                device: "power meter",
                kind: "cs5460a".to_string(),
            }),
        }
    }

    pub fn create_tag_reader(
        settings: &TagReaderSettings,
    ) -> Result<Arc<dyn TagReader>, HardwareError> {
        if !settings.enabled {
            return Err(HardwareError::NotEnabled("tag reader"));
        }
        if settings.kind != TagReaderType::Dummy {
            warn!(
                kind = ?settings.kind,
                "tag reader driver not available, falling back to dummy reader"
            );
        }
        Ok(Arc::new(DummyTagReader::new(
            settings.tag_ids.clone(),
            Duration::from_millis(settings.poll_interval_ms),
        )))
    }

    pub fn create_display(settings: &DisplaySettings) -> Option<Arc<dyn Display>> {
        if !settings.enabled {
            return None;
        }
        if settings.kind != DisplayType::Log {
            warn!(
                kind = ?settings.kind,
                "display driver not available, falling back to log display"
            );
        }
        Some(Arc::new(LogDisplay))
    }

    pub fn create_indicator(settings: &IndicatorSettings) -> Option<Arc<dyn Indicator>> {
        if !settings.enabled {
            return None;
        }
        if settings.kind != IndicatorType::Log {
            warn!(
                kind = ?settings.kind,
                "indicator driver not available, falling back to log indicator"
            );
        }
        Some(Arc::new(LogIndicator))
    }
}
