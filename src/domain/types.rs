use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ============================================================================
// Connector Status
// ============================================================================

/// Operational status of a connector, as reported to the central system.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum ConnectorStatus {
    #[default]
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    /// Statuses in which an energy transfer is in progress or about to begin.
    pub fn is_charging(&self) -> bool {
        matches!(self, Self::Charging | Self::Preparing)
    }
}

/// Charge point error code attached to every status change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum ErrorCode {
    #[default]
    NoError,
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    OtherError,
    OverCurrentFailure,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    OverVoltage,
    WeakSignal,
}

/// Why a charging session was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum StopReason {
    DeAuthorized,
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
}

// ============================================================================
// Metering
// ============================================================================

/// Quantity read from a power meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Measurand {
    #[serde(rename = "Energy.Active.Import.Register")]
    #[strum(serialize = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Energy.Active.Export.Register")]
    #[strum(serialize = "Energy.Active.Export.Register")]
    EnergyActiveExportRegister,
    #[serde(rename = "Energy.Active.Import.Interval")]
    #[strum(serialize = "Energy.Active.Import.Interval")]
    EnergyActiveImportInterval,
    #[serde(rename = "Energy.Active.Export.Interval")]
    #[strum(serialize = "Energy.Active.Export.Interval")]
    EnergyActiveExportInterval,
    #[serde(rename = "Power.Active.Import")]
    #[strum(serialize = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Power.Active.Export")]
    #[strum(serialize = "Power.Active.Export")]
    PowerActiveExport,
    #[serde(rename = "Current.Import")]
    #[strum(serialize = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Current.Export")]
    #[strum(serialize = "Current.Export")]
    CurrentExport,
    #[serde(rename = "Voltage")]
    #[strum(serialize = "Voltage")]
    Voltage,
}

impl Measurand {
    pub fn is_energy(&self) -> bool {
        matches!(
            self,
            Self::EnergyActiveImportRegister
                | Self::EnergyActiveExportRegister
                | Self::EnergyActiveImportInterval
                | Self::EnergyActiveExportInterval
        )
    }

    pub fn is_power(&self) -> bool {
        matches!(self, Self::PowerActiveImport | Self::PowerActiveExport)
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Self::CurrentImport | Self::CurrentExport)
    }

    /// Export quantities count against the session total.
    pub fn is_export(&self) -> bool {
        matches!(
            self,
            Self::EnergyActiveExportRegister
                | Self::EnergyActiveExportInterval
                | Self::PowerActiveExport
                | Self::CurrentExport
        )
    }

    /// Unit the power meter reports this quantity in.
    pub fn default_unit(&self) -> UnitOfMeasure {
        if self.is_energy() {
            UnitOfMeasure::Wh
        } else if self.is_power() {
            UnitOfMeasure::W
        } else if self.is_current() {
            UnitOfMeasure::A
        } else {
            UnitOfMeasure::V
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum UnitOfMeasure {
    Wh,
    #[serde(rename = "kWh")]
    #[strum(serialize = "kWh")]
    KWh,
    W,
    #[serde(rename = "kW")]
    #[strum(serialize = "kW")]
    KW,
    A,
    V,
}

/// Single measured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub measurand: Measurand,
    pub value: f64,
    pub unit: UnitOfMeasure,
}

impl SampledValue {
    pub fn new(measurand: Measurand, value: f64) -> Self {
        Self {
            measurand,
            value,
            unit: measurand.default_unit(),
        }
    }

    pub fn with_unit(measurand: Measurand, value: f64, unit: UnitOfMeasure) -> Self {
        Self {
            measurand,
            value,
            unit,
        }
    }

    /// Value scaled to the base unit (W, Wh, A or V).
    pub fn base_value(&self) -> f64 {
        match self.unit {
            UnitOfMeasure::KWh | UnitOfMeasure::KW => self.value * 1000.0,
            _ => self.value,
        }
    }
}

/// Timestamped group of values read in one sampling pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSample {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<SampledValue>,
}

impl MeterSample {
    pub fn new(timestamp: DateTime<Utc>, values: Vec<SampledValue>) -> Self {
        Self { timestamp, values }
    }

    pub fn value_of(&self, predicate: impl Fn(&Measurand) -> bool) -> Option<&SampledValue> {
        self.values.iter().find(|v| predicate(&v.measurand))
    }
}
