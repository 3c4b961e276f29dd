use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::types::ForecastPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Warning {
    WifiFailed,
    BackendRequestFailed,
    WeatherRequestFailed,
    WeatherDangerous,
}

impl Warning {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WifiFailed => "WIFI_FAILED",
            Self::BackendRequestFailed => "BACKEND_REQUEST_FAILED",
            Self::WeatherRequestFailed => "WEATHER_REQUEST_FAILED",
            Self::WeatherDangerous => "WEATHER_DANGEROUS",
        }
    }
}

/// Receiver of warning state changes (LED/LCD side of the device).
pub trait WarningSink: Send {
    fn add_warning(&mut self, warning: Warning);
    fn remove_warning(&mut self, warning: Warning);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarningSet {
    active: BTreeSet<Warning>,
}

impl WarningSet {
    pub fn contains(&self, warning: Warning) -> bool {
        self.active.contains(&warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = Warning> + '_ {
        self.active.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

impl WarningSink for WarningSet {
    fn add_warning(&mut self, warning: Warning) {
        if self.active.insert(warning) {
            warn!(warning = warning.as_str(), "warning raised");
        }
    }

    fn remove_warning(&mut self, warning: Warning) {
        if self.active.remove(&warning) {
            info!(warning = warning.as_str(), "warning cleared");
        }
    }
}

/// Raises `WeatherDangerous` if any upcoming forecast point within
/// `hours_ahead` exceeds `max_wind_speed`, otherwise clears it.
pub fn check_wind_warning(
    forecast: &[ForecastPoint],
    now: DateTime<Utc>,
    max_wind_speed: f64,
    hours_ahead: f64,
    sink: &mut dyn WarningSink,
) -> bool {
    let horizon = chrono::Duration::seconds((hours_ahead * 3_600.0) as i64);
    let dangerous = forecast
        .iter()
        .any(|point| point.timestamp - now < horizon && point.wind_speed > max_wind_speed);

    if dangerous {
        sink.add_warning(Warning::WeatherDangerous);
    } else {
        sink.remove_warning(Warning::WeatherDangerous);
    }
    dangerous
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn point(hours: i64, wind_speed: f64, now: DateTime<Utc>) -> ForecastPoint {
        ForecastPoint {
            timestamp: now + Duration::hours(hours),
            temperature: 12.0,
            wind_speed,
        }
    }

    #[test]
    fn set_deduplicates_and_orders() {
        let mut warnings = WarningSet::default();
        warnings.add_warning(Warning::WeatherDangerous);
        warnings.add_warning(Warning::WifiFailed);
        warnings.add_warning(Warning::WifiFailed);

        let active: Vec<_> = warnings.iter().collect();
        assert_eq!(active, vec![Warning::WifiFailed, Warning::WeatherDangerous]);

        warnings.remove_warning(Warning::WifiFailed);
        assert!(!warnings.contains(Warning::WifiFailed));
        warnings.clear();
        assert!(warnings.is_empty());
    }

    #[test]
    fn strong_wind_soon_raises_warning() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 6, 0, 0).unwrap();
        let mut warnings = WarningSet::default();

        let forecast = vec![point(3, 4.0, now), point(6, 9.5, now)];
        assert!(check_wind_warning(&forecast, now, 8.0, 9.0, &mut warnings));
        assert!(warnings.contains(Warning::WeatherDangerous));

        // Strong wind beyond the horizon does not count, and clears the flag.
        let forecast = vec![point(3, 4.0, now), point(12, 15.0, now)];
        assert!(!check_wind_warning(&forecast, now, 8.0, 9.0, &mut warnings));
        assert!(!warnings.contains(Warning::WeatherDangerous));
    }
}
