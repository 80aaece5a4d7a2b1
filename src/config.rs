use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::domain::Measurand;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub charge_point: ChargePointConfig,
    #[serde(default)]
    #[validate(nested)]
    pub auth: AuthConfig,
    #[serde(default)]
    #[validate(nested)]
    pub smart_charging: SmartChargingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    #[validate(nested)]
    pub connectors: Vec<ConnectorSettings>,
    #[serde(default)]
    #[validate(nested)]
    pub tag_reader: TagReaderSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub indicator: IndicatorSettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChargePointConfig {
    #[validate(length(min = 1))]
    pub id: String,
    /// Values <= 0 fall back to 180 minutes.
    #[serde(default = "default_max_charging_time")]
    pub max_charging_time_minutes: i64,
    #[serde(default = "default_sample_interval")]
    #[validate(range(min = 1))]
    pub meter_value_sample_interval_secs: u64,
    #[serde(default = "default_sampled_data")]
    pub meter_values_sampled_data: Vec<Measurand>,
    /// Capacity of the status notification channel.
    #[serde(default = "default_notification_buffer")]
    #[validate(range(min = 1))]
    pub notification_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub authorization_cache_enabled: bool,
    #[serde(default)]
    pub local_auth_list_enabled: bool,
    #[serde(default = "default_max_tags")]
    #[validate(range(min = 1))]
    pub max_tags: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorization_cache_enabled: true,
            local_auth_list_enabled: false,
            max_tags: default_max_tags(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SmartChargingConfig {
    #[serde(default = "default_max_stack_level")]
    #[validate(range(min = 0))]
    pub max_stack_level: i32,
    #[serde(default = "default_max_profiles")]
    #[validate(range(min = 1))]
    pub max_profiles_installed: usize,
    #[serde(default = "default_max_periods")]
    #[validate(range(min = 1))]
    pub max_schedule_periods: usize,
}

impl Default for SmartChargingConfig {
    fn default() -> Self {
        Self {
            max_stack_level: default_max_stack_level(),
            max_profiles_installed: default_max_profiles(),
            max_schedule_periods: default_max_periods(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Database file. Without one, state is kept in memory only.
    pub path: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Hardware
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConnectorSettings {
    #[validate(range(min = 1))]
    pub evse_id: i32,
    #[validate(range(min = 1))]
    pub connector_id: i32,
    #[serde(rename = "type", default = "default_connector_type")]
    #[validate(length(min = 1))]
    pub connector_type: String,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub power_meter: PowerMeterSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayType {
    #[default]
    Dummy,
    Gpio,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelaySettings {
    #[serde(rename = "type", default)]
    pub kind: RelayType,
    #[serde(default)]
    pub pin: u32,
    #[serde(default)]
    pub inverse_logic: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMeterType {
    #[default]
    Dummy,
    Cs5460a,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerMeterSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: PowerMeterType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagReaderType {
    #[default]
    Dummy,
    Pn532,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TagReaderSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: TagReaderType,
    /// Tags the dummy reader cycles through.
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,
}

impl Default for TagReaderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: TagReaderType::Dummy,
            tag_ids: Vec::new(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    #[default]
    Log,
    Hd44780,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplaySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: DisplayType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    #[default]
    Log,
    Ws281x,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicatorSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: IndicatorType,
}

fn default_true() -> bool {
    true
}
fn default_max_charging_time() -> i64 {
    180
}
fn default_sample_interval() -> u64 {
    10
}
fn default_sampled_data() -> Vec<Measurand> {
    vec![Measurand::PowerActiveImport]
}
fn default_notification_buffer() -> usize {
    20
}
fn default_max_tags() -> usize {
    10
}
fn default_max_stack_level() -> i32 {
    10
}
fn default_max_profiles() -> usize {
    20
}
fn default_max_periods() -> usize {
    24
}
fn default_connector_type() -> String {
    "Schuko".to_string()
}
fn default_poll_interval() -> u64 {
    5000
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Reads `path`, then applies `CPC__`-prefixed environment overrides
    /// (e.g. `CPC__AUTH__MAX_TAGS=100`).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CPC__").split("__"));
        Self::extract(figment)
            .with_context(|| format!("loading configuration from {}", path.display()))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn sample_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.charge_point.meter_value_sample_interval_secs)
    }
}
