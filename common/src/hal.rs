//! Collaborators the core drives but does not implement.

use chrono::{DateTime, Utc};

use crate::{
    error::{NetworkError, SensorError},
    types::{DiagnosticRecord, WeatherReport},
};

pub trait TemperatureSensor: Send {
    fn read_temperature(&mut self) -> Result<f64, SensorError>;
}

/// A single hobby servo. Angles are in degrees, 0..=180.
pub trait ServoHardware: Send {
    fn write_angle(&mut self, angle: u8);
    fn read_angle(&self) -> u8;
}

/// Output driving the servos' shared power rail.
pub trait PowerRail: Send {
    fn set_power(&mut self, on: bool);
}

pub trait WeatherSource: Send {
    fn fetch(&mut self) -> Result<WeatherReport, NetworkError>;
}

pub trait TelemetrySink: Send {
    fn upload(&mut self, record: &DiagnosticRecord) -> Result<(), NetworkError>;
}

pub trait Connectivity: Send {
    fn is_connected(&self) -> bool;
    /// Starts a connection attempt without waiting for it to finish.
    fn begin_connect(&mut self);
}

pub trait WallClock: Send {
    /// Current wall-clock time, or `None` until time has been synchronised.
    fn now_utc(&self) -> Option<DateTime<Utc>>;
}
