use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::StoreError, store::SettingsStore};

/// Tunables of the window-opening controller. Read fresh from the settings
/// store at the start of every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(rename = "optimalTemperature")]
    pub optimal_temperature: f64,
    #[serde(rename = "pTermPositive")]
    pub p_term_positive: f64,
    #[serde(rename = "pTermNegative")]
    pub p_term_negative: f64,
    #[serde(rename = "dTermPositive")]
    pub d_term_positive: f64,
    #[serde(rename = "dTermNegative")]
    pub d_term_negative: f64,
    #[serde(rename = "oTermPositive")]
    pub o_term_positive: f64,
    #[serde(rename = "oTermNegative")]
    pub o_term_negative: f64,
    #[serde(rename = "iTerm")]
    pub i_term: f64,
    #[serde(rename = "openingTermPositiveTemperatureIncrease")]
    pub opening_term_positive_temperature_increase: f64,
    #[serde(rename = "changeDiffThreshold")]
    pub change_diff_threshold: f64,
    #[serde(rename = "windowOpeningCalculationIntervalSecs")]
    pub evaluation_interval_secs: u32,
    #[serde(rename = "weatherLogNotOlderThanHours")]
    pub weather_log_max_age_hours: f64,
    #[serde(rename = "pm25Norm")]
    pub pm2_5_norm: f64,
    #[serde(rename = "pm10Norm")]
    pub pm10_norm: f64,
    #[serde(rename = "pm25Weight")]
    pub pm2_5_weight: f64,
    #[serde(rename = "pm10Weight")]
    pub pm10_weight: f64,
    #[serde(rename = "maxOutsideTemperatureDiffFromOptimal")]
    pub max_outside_temperature_diff: f64,
    #[serde(rename = "outsideTemperatureClosingThreshold")]
    pub outside_temperature_closing_threshold: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            optimal_temperature: 22.0,
            p_term_positive: 25.0,
            p_term_negative: 15.0,
            d_term_positive: 50.0,
            d_term_negative: 45.0,
            o_term_positive: 5.0,
            o_term_negative: 0.2,
            i_term: 4.0,
            opening_term_positive_temperature_increase: 5.0,
            change_diff_threshold: 20.0,
            evaluation_interval_secs: 300,
            weather_log_max_age_hours: 3.0,
            pm2_5_norm: 25.0,
            pm10_norm: 50.0,
            pm2_5_weight: 1.0,
            pm10_weight: 1.0,
            max_outside_temperature_diff: 45.0,
            outside_temperature_closing_threshold: -80.0,
        }
    }
}

impl ControllerConfig {
    /// Snapshot of the current settings; unset keys fall back to defaults.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let mut config = Self::default();
        for key in SettingKey::CONTROLLER {
            if store.is_set(key) {
                config.apply(key, key.decode(store.read(key)));
            }
        }
        config
    }

    pub fn evaluation_interval_ms(&self) -> u64 {
        u64::from(self.evaluation_interval_secs) * 1_000
    }

    pub fn weather_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.weather_log_max_age_hours * 3_600.0) as i64)
    }

    pub fn get(&self, key: SettingKey) -> Option<f64> {
        let value = match key {
            SettingKey::OptimalTemperature => self.optimal_temperature,
            SettingKey::PTermPositive => self.p_term_positive,
            SettingKey::PTermNegative => self.p_term_negative,
            SettingKey::DTermPositive => self.d_term_positive,
            SettingKey::DTermNegative => self.d_term_negative,
            SettingKey::OTermPositive => self.o_term_positive,
            SettingKey::OTermNegative => self.o_term_negative,
            SettingKey::ITerm => self.i_term,
            SettingKey::OpeningTermPositiveTemperatureIncrease => {
                self.opening_term_positive_temperature_increase
            }
            SettingKey::ChangeDiffThreshold => self.change_diff_threshold,
            SettingKey::WindowOpeningCalculationInterval => {
                f64::from(self.evaluation_interval_secs)
            }
            SettingKey::WeatherLogMaxAgeHours => self.weather_log_max_age_hours,
            SettingKey::Pm25Norm => self.pm2_5_norm,
            SettingKey::Pm10Norm => self.pm10_norm,
            SettingKey::Pm25Weight => self.pm2_5_weight,
            SettingKey::Pm10Weight => self.pm10_weight,
            SettingKey::MaxOutsideTemperatureDiff => self.max_outside_temperature_diff,
            SettingKey::OutsideTemperatureClosingThreshold => {
                self.outside_temperature_closing_threshold
            }
            _ => return None,
        };
        Some(value)
    }

    fn apply(&mut self, key: SettingKey, value: f64) {
        match key {
            SettingKey::OptimalTemperature => self.optimal_temperature = value,
            SettingKey::PTermPositive => self.p_term_positive = value,
            SettingKey::PTermNegative => self.p_term_negative = value,
            SettingKey::DTermPositive => self.d_term_positive = value,
            SettingKey::DTermNegative => self.d_term_negative = value,
            SettingKey::OTermPositive => self.o_term_positive = value,
            SettingKey::OTermNegative => self.o_term_negative = value,
            SettingKey::ITerm => self.i_term = value,
            SettingKey::OpeningTermPositiveTemperatureIncrease => {
                self.opening_term_positive_temperature_increase = value
            }
            SettingKey::ChangeDiffThreshold => self.change_diff_threshold = value,
            SettingKey::WindowOpeningCalculationInterval => {
                self.evaluation_interval_secs = value as u32
            }
            SettingKey::WeatherLogMaxAgeHours => self.weather_log_max_age_hours = value,
            SettingKey::Pm25Norm => self.pm2_5_norm = value,
            SettingKey::Pm10Norm => self.pm10_norm = value,
            SettingKey::Pm25Weight => self.pm2_5_weight = value,
            SettingKey::Pm10Weight => self.pm10_weight = value,
            SettingKey::MaxOutsideTemperatureDiff => self.max_outside_temperature_diff = value,
            SettingKey::OutsideTemperatureClosingThreshold => {
                self.outside_temperature_closing_threshold = value
            }
            SettingKey::OpenServoMin
            | SettingKey::OpenServoMax
            | SettingKey::CloseServoMin
            | SettingKey::CloseServoMax => {}
        }
    }
}

/// Writes the default of every controller key that has never been stored.
pub fn seed_defaults(store: &mut dyn SettingsStore) -> Result<(), StoreError> {
    let defaults = ControllerConfig::default();
    for key in SettingKey::CONTROLLER {
        if store.is_set(key) {
            continue;
        }
        if let Some(value) = defaults.get(key) {
            debug!(key = %key, value, "seeding default setting");
            store.write(key, key.encode(value))?;
        }
    }
    Ok(())
}

/// Every integer persisted in the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettingKey {
    OptimalTemperature,
    PTermPositive,
    PTermNegative,
    DTermPositive,
    DTermNegative,
    OTermPositive,
    OTermNegative,
    ITerm,
    OpeningTermPositiveTemperatureIncrease,
    ChangeDiffThreshold,
    WindowOpeningCalculationInterval,
    WeatherLogMaxAgeHours,
    Pm25Norm,
    Pm10Norm,
    Pm25Weight,
    Pm10Weight,
    MaxOutsideTemperatureDiff,
    OutsideTemperatureClosingThreshold,
    OpenServoMin,
    OpenServoMax,
    CloseServoMin,
    CloseServoMax,
}

impl SettingKey {
    pub const CONTROLLER: [SettingKey; 18] = [
        Self::OptimalTemperature,
        Self::PTermPositive,
        Self::PTermNegative,
        Self::DTermPositive,
        Self::DTermNegative,
        Self::OTermPositive,
        Self::OTermNegative,
        Self::ITerm,
        Self::OpeningTermPositiveTemperatureIncrease,
        Self::ChangeDiffThreshold,
        Self::WindowOpeningCalculationInterval,
        Self::WeatherLogMaxAgeHours,
        Self::Pm25Norm,
        Self::Pm10Norm,
        Self::Pm25Weight,
        Self::Pm10Weight,
        Self::MaxOutsideTemperatureDiff,
        Self::OutsideTemperatureClosingThreshold,
    ];

    pub const ALL: [SettingKey; 22] = [
        Self::OptimalTemperature,
        Self::PTermPositive,
        Self::PTermNegative,
        Self::DTermPositive,
        Self::DTermNegative,
        Self::OTermPositive,
        Self::OTermNegative,
        Self::ITerm,
        Self::OpeningTermPositiveTemperatureIncrease,
        Self::ChangeDiffThreshold,
        Self::WindowOpeningCalculationInterval,
        Self::WeatherLogMaxAgeHours,
        Self::Pm25Norm,
        Self::Pm10Norm,
        Self::Pm25Weight,
        Self::Pm10Weight,
        Self::MaxOutsideTemperatureDiff,
        Self::OutsideTemperatureClosingThreshold,
        Self::OpenServoMin,
        Self::OpenServoMax,
        Self::CloseServoMin,
        Self::CloseServoMax,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OptimalTemperature => "OPTIMAL_TEMPERATURE",
            Self::PTermPositive => "P_TERM_POSITIVE",
            Self::PTermNegative => "P_TERM_NEGATIVE",
            Self::DTermPositive => "D_TERM_POSITIVE",
            Self::DTermNegative => "D_TERM_NEGATIVE",
            Self::OTermPositive => "O_TERM_POSITIVE",
            Self::OTermNegative => "O_TERM_NEGATIVE",
            Self::ITerm => "I_TERM",
            Self::OpeningTermPositiveTemperatureIncrease => {
                "OPENING_TERM_POSITIVE_TEMPERATURE_INCREASE"
            }
            Self::ChangeDiffThreshold => "CHANGE_DIFF_THRESHOLD",
            Self::WindowOpeningCalculationInterval => "WINDOW_OPENING_CALCULATION_INTERVAL",
            Self::WeatherLogMaxAgeHours => "WEATHER_LOG_MAX_AGE_HOURS",
            Self::Pm25Norm => "PM25_NORM",
            Self::Pm10Norm => "PM10_NORM",
            Self::Pm25Weight => "PM25_WEIGHT",
            Self::Pm10Weight => "PM10_WEIGHT",
            Self::MaxOutsideTemperatureDiff => "MAX_OUTSIDE_TEMPERATURE_DIFF",
            Self::OutsideTemperatureClosingThreshold => "OUTSIDE_TEMPERATURE_CLOSING_THRESHOLD",
            Self::OpenServoMin => "OPEN_SERVO_MIN",
            Self::OpenServoMax => "OPEN_SERVO_MAX",
            Self::CloseServoMin => "CLOSE_SERVO_MIN",
            Self::CloseServoMax => "CLOSE_SERVO_MAX",
        }
    }

    pub fn parse(name: &str) -> Result<Self, StoreError> {
        let upper = name.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == upper)
            .ok_or_else(|| StoreError::UnknownKey(name.to_string()))
    }

    /// Stored integers are fixed-point; this is the number of stored units
    /// per unit of the real value.
    pub fn scale(self) -> f64 {
        match self {
            Self::OTermNegative => 100.0,
            _ => 1.0,
        }
    }

    /// Inclusive range of raw stored values accepted by `validate`.
    pub fn raw_range(self) -> (i32, i32) {
        match self {
            Self::OptimalTemperature => (10, 35),
            Self::PTermPositive
            | Self::PTermNegative
            | Self::DTermPositive
            | Self::DTermNegative
            | Self::OTermPositive
            | Self::ITerm => (0, 1_000),
            Self::OTermNegative => (0, 10_000),
            Self::OpeningTermPositiveTemperatureIncrease => (0, 50),
            Self::ChangeDiffThreshold => (0, 100),
            Self::WindowOpeningCalculationInterval => (10, 86_400),
            Self::WeatherLogMaxAgeHours => (1, 48),
            Self::Pm25Norm | Self::Pm10Norm => (1, 1_000),
            Self::Pm25Weight | Self::Pm10Weight => (0, 100),
            Self::MaxOutsideTemperatureDiff => (1, 100),
            Self::OutsideTemperatureClosingThreshold => (-1_000, 0),
            Self::OpenServoMin | Self::OpenServoMax | Self::CloseServoMin | Self::CloseServoMax => {
                (0, 180)
            }
        }
    }

    pub fn validate(self, raw: i32) -> Result<i32, StoreError> {
        let (min, max) = self.raw_range();
        if (min..=max).contains(&raw) {
            Ok(raw)
        } else {
            Err(StoreError::OutOfRange {
                key: self,
                value: raw,
            })
        }
    }

    pub fn encode(self, value: f64) -> i32 {
        (value * self.scale()).round() as i32
    }

    pub fn decode(self, raw: i32) -> f64 {
        f64::from(raw) / self.scale()
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestration constants of the cooperative runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub ramp_step_interval_ms: u64,
    pub servo_stagger_ms: u64,
    pub power_debounce_ms: u64,
    pub weather_refresh_interval_ms: u64,
    pub network_idle_poll_ms: u64,
    pub network_busy_poll_ms: u64,
    pub connect_retry_ms: u64,
    pub connect_timeout_ms: u64,
    pub mode_recheck_ms: u64,
    pub sensor_retry_ms: u64,
    /// How long boot waits for a first temperature before seeding with the
    /// optimal one.
    pub boot_sensor_wait_ms: u64,
    pub wind_warning_speed: f64,
    pub wind_warning_hours_ahead: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ramp_step_interval_ms: 40,
            servo_stagger_ms: 500,
            power_debounce_ms: 2_000,
            weather_refresh_interval_ms: 3_600_000,
            network_idle_poll_ms: 1_000,
            network_busy_poll_ms: 50,
            connect_retry_ms: 1_000,
            connect_timeout_ms: 10_000,
            mode_recheck_ms: 1_000,
            sensor_retry_ms: 5_000,
            boot_sensor_wait_ms: 60_000,
            wind_warning_speed: 8.0,
            wind_warning_hours_ahead: 9.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./.window-opener")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            network: NetworkConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.ramp_step_interval_ms = self.ramp_step_interval_ms.clamp(5, 1_000);
        self.network_busy_poll_ms = self.network_busy_poll_ms.max(1);
        self.network_idle_poll_ms = self.network_idle_poll_ms.max(self.network_busy_poll_ms);
        self.connect_retry_ms = self.connect_retry_ms.max(100);
        self.mode_recheck_ms = self.mode_recheck_ms.max(100);
        self.sensor_retry_ms = self.sensor_retry_ms.max(100);
        self.weather_refresh_interval_ms = self.weather_refresh_interval_ms.max(60_000);
    }
}
