pub mod actuator;
pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod hal;
pub mod history;
pub mod network_queue;
pub mod power_gate;
pub mod scheduler;
pub mod store;
pub mod topics;
pub mod types;
pub mod warnings;

#[cfg(test)]
mod testing;

pub use actuator::{CalibrationBound, ServoActuator, ServoRole, ServoState};
pub use app::{App, AppState, Collaborators, Runtime};
pub use config::{
    seed_defaults, ControllerConfig, NetworkConfig, RuntimeConfig, SettingKey, TimingConfig,
};
pub use controller::{evaluate, Evaluation};
pub use error::{ControlError, NetworkError, SensorError, StoreError};
pub use hal::{
    Connectivity, PowerRail, ServoHardware, TelemetrySink, TemperatureSensor, WallClock,
    WeatherSource,
};
pub use history::{TemperatureHistory, WeatherHistory};
pub use network_queue::{LinkState, NetworkQueue, NetworkQueueEntry, RequestKind};
pub use power_gate::{PowerGate, PowerState};
pub use scheduler::Scheduler;
pub use store::{MemoryStore, SettingsStore};
pub use topics::*;
pub use types::{
    AppMode, ControllerStatus, DiagnosticRecord, ForecastPoint, Log, TermBreakdown,
    WeatherReport, WeatherSnapshot,
};
pub use warnings::{Warning, WarningSet, WarningSink};
