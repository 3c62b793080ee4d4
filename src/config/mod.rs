// src/config/mod.rs - TOML configuration for the pump host.
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub thermal: ThermalConfig,

    #[serde(default)]
    pub buffer: BufferRule,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub transmit: TransmitConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

/// Cycle scheduling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cycle_seconds: default_cycle_seconds(),
        }
    }
}

/// PID gains.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default = "default_kp")]
    pub kp: Decimal,
    #[serde(default = "default_ki")]
    pub ki: Decimal,
    #[serde(default = "default_kd")]
    pub kd: Decimal,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
        }
    }
}

/// Thermal model constants and comfort floors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThermalConfig {
    /// Degrees lost per hour per degree of outside/inside difference.
    #[serde(default = "default_cooling_rate")]
    pub cooling_rate_per_hour_per_degree: Decimal,
    /// Comfort/safety floor used inside the backward simulation.
    #[serde(default = "default_allowed_min_inside_temp")]
    pub allowed_min_inside_temp: Decimal,
    /// Default hard floor for the target temperature.
    #[serde(default = "default_minimum_inside_temp")]
    pub minimum_inside_temp: Decimal,
    /// Used when every outside source and the forecast are gone.
    #[serde(default = "default_predefined_outside_temp")]
    pub predefined_outside_temp: Decimal,
    /// One-sided dead zone above target.
    #[serde(default = "default_hysteresis")]
    pub hysteresis: Decimal,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            cooling_rate_per_hour_per_degree: default_cooling_rate(),
            allowed_min_inside_temp: default_allowed_min_inside_temp(),
            minimum_inside_temp: default_minimum_inside_temp(),
            predefined_outside_temp: default_predefined_outside_temp(),
            hysteresis: default_hysteresis(),
        }
    }
}

/// Cooling buffer length: fixed, or linear in the forecast mean outside
/// temperature (colder means a longer buffer).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BufferRule {
    Fixed {
        hours: Decimal,
    },
    OutsideLinear {
        base: Decimal,
        per_degree: Decimal,
        min_hours: Decimal,
        max_hours: Decimal,
    },
}

impl BufferRule {
    pub fn hours_for(&self, outside_temp: Decimal) -> Decimal {
        match self {
            BufferRule::Fixed { hours } => *hours,
            BufferRule::OutsideLinear {
                base,
                per_degree,
                min_hours,
                max_hours,
            } => (*base - *per_degree * outside_temp)
                .min(*max_hours)
                .max(*min_hours),
        }
    }
}

impl Default for BufferRule {
    fn default() -> Self {
        BufferRule::Fixed { hours: dec!(20) }
    }
}

/// Per-source staleness TTLs, minutes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheTtl {
    #[serde(default = "default_ok_ttl")]
    pub if_ok: i64,
    #[serde(default = "default_failed_ttl")]
    pub if_failed: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub times: HashMap<String, CacheTtl>,
}

impl CacheConfig {
    /// `(ok, failed)` TTLs for a source name, defaulting to 60/120 minutes.
    pub fn ttl_minutes(&self, name: &str) -> (i64, i64) {
        match self.times.get(name) {
            Some(ttl) => (ttl.if_ok, ttl.if_failed),
            None => (default_ok_ttl(), default_failed_ttl()),
        }
    }
}

/// Sensor drop files and fusion windows.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub outside: HashMap<String, PathBuf>,
    #[serde(default)]
    pub inside: HashMap<String, PathBuf>,
    #[serde(default)]
    pub dew_point: HashMap<String, PathBuf>,
    #[serde(default)]
    pub forecast: HashMap<String, PathBuf>,

    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: i64,
    #[serde(default = "default_dew_point_max_age_minutes")]
    pub dew_point_max_age_minutes: i64,
    #[serde(default = "default_forecast_max_age_minutes")]
    pub forecast_max_age_minutes: i64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            outside: HashMap::new(),
            inside: HashMap::new(),
            dew_point: HashMap::new(),
            forecast: HashMap::new(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            max_age_minutes: default_max_age_minutes(),
            dew_point_max_age_minutes: default_dew_point_max_age_minutes(),
            forecast_max_age_minutes: default_forecast_max_age_minutes(),
        }
    }
}

/// IR transmitter serial port.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransmitConfig {
    #[serde(default = "default_transmit_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            device: default_transmit_device(),
            baud: default_baud(),
        }
    }
}

/// Controller checkpoint location.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_cycle_seconds() -> u64 {
    60
}

fn default_kp() -> Decimal {
    dec!(5)
}

fn default_ki() -> Decimal {
    dec!(0.00005)
}

fn default_kd() -> Decimal {
    dec!(36000)
}

fn default_cooling_rate() -> Decimal {
    dec!(0.02)
}

fn default_allowed_min_inside_temp() -> Decimal {
    dec!(5)
}

fn default_minimum_inside_temp() -> Decimal {
    dec!(10)
}

fn default_predefined_outside_temp() -> Decimal {
    dec!(-10)
}

fn default_hysteresis() -> Decimal {
    dec!(0.5)
}

fn default_ok_ttl() -> i64 {
    60
}

fn default_failed_ttl() -> i64 {
    120
}

fn default_fetch_timeout_seconds() -> u64 {
    10
}

fn default_max_age_minutes() -> i64 {
    60
}

fn default_dew_point_max_age_minutes() -> i64 {
    6 * 60
}

fn default_forecast_max_age_minutes() -> i64 {
    48 * 60
}

fn default_transmit_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pumphost_state.json")
}
