use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppMode {
    Auto,
    Manual,
}

impl AppMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AUTO" => Some(Self::Auto),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One controller evaluation as kept in the temperature history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Log {
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
    #[serde(rename = "insideTemperature")]
    pub inside_temperature: f64,
    #[serde(rename = "windowOpening")]
    pub window_opening: u8,
    #[serde(rename = "deltaBeforeThreshold")]
    pub delta_before_threshold: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    #[serde(rename = "forecastTimestamp")]
    pub forecast_timestamp: DateTime<Utc>,
    #[serde(rename = "outsideTemperature")]
    pub outside_temperature: f64,
    #[serde(rename = "windSpeed")]
    pub wind_speed: f64,
    pub pm2_5: f64,
    #[serde(rename = "pm2_5Timestamp")]
    pub pm2_5_timestamp: DateTime<Utc>,
    pub pm10: f64,
    #[serde(rename = "pm10Timestamp")]
    pub pm10_timestamp: DateTime<Utc>,
}

impl WeatherSnapshot {
    /// A snapshot is fresh only while every one of its readings is younger
    /// than `max_age`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        let oldest_allowed = now - max_age;
        [
            self.forecast_timestamp,
            self.pm2_5_timestamp,
            self.pm10_timestamp,
        ]
        .iter()
        .all(|timestamp| *timestamp >= oldest_allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    #[serde(rename = "windSpeed")]
    pub wind_speed: f64,
}

/// Result of one weather/pollution refresh: the current snapshot plus the
/// short-term forecast used for the dangerous-wind warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub snapshot: WeatherSnapshot,
    #[serde(default)]
    pub forecast: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TermBreakdown {
    #[serde(rename = "proportionalTermValue")]
    pub proportional: f64,
    #[serde(rename = "integralTermValue")]
    pub integral: f64,
    #[serde(rename = "derivativeTermValue")]
    pub derivative: f64,
    #[serde(rename = "openingTermValue")]
    pub opening: f64,
    #[serde(
        rename = "outsideTemperatureTermValue",
        skip_serializing_if = "Option::is_none"
    )]
    pub outside_temperature: Option<f64>,
    #[serde(
        rename = "airPollutionTermValue",
        skip_serializing_if = "Option::is_none"
    )]
    pub air_quality: Option<f64>,
}

impl TermBreakdown {
    pub fn sum(&self) -> f64 {
        self.proportional
            + self.integral
            + self.derivative
            + self.opening
            + self.outside_temperature.unwrap_or(0.0)
            + self.air_quality.unwrap_or(0.0)
    }
}

/// Full breakdown of one controller evaluation, uploaded as telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRecord {
    #[serde(rename = "insideTemperature")]
    pub inside_temperature: f64,
    #[serde(rename = "windowOpening")]
    pub window_opening: u8,
    #[serde(rename = "deltaTemporaryWindowOpening")]
    pub delta_before_threshold: i32,
    #[serde(rename = "deltaFinalWindowOpening")]
    pub delta_after_threshold: i32,
    #[serde(rename = "outsideTemperature", skip_serializing_if = "Option::is_none")]
    pub outside_temperature: Option<f64>,
    #[serde(rename = "pm25", skip_serializing_if = "Option::is_none")]
    pub pm2_5: Option<f64>,
    #[serde(rename = "pm10", skip_serializing_if = "Option::is_none")]
    pub pm10: Option<f64>,
    pub config: ControllerConfig,
    #[serde(rename = "partialData")]
    pub terms: TermBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    #[serde(rename = "windowOpening")]
    pub window_opening: u8,
    #[serde(rename = "lastInsideTemperature")]
    pub last_inside_temperature: f64,
    #[serde(rename = "wifiConnected")]
    pub wifi_connected: bool,
    #[serde(rename = "powerEnergized")]
    pub power_energized: bool,
    #[serde(rename = "pendingNetworkRequests")]
    pub pending_network_requests: usize,
    #[serde(rename = "openServoRamping")]
    pub open_servo_ramping: bool,
    #[serde(rename = "closeServoRamping")]
    pub close_servo_ramping: bool,
    #[serde(rename = "freshWeather")]
    pub fresh_weather: Option<WeatherSnapshot>,
    pub warnings: Vec<&'static str>,
}
