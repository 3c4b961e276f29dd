//! Host-side collaborators: MQTT-backed sensor/weather/telemetry, a JSON file
//! settings store and logging stand-ins for the servo hardware.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use tracing::{debug, info};

use window_opener_common::{
    Connectivity, DiagnosticRecord, MemoryStore, NetworkError, PowerRail, SensorError,
    ServoHardware, SettingKey, SettingsStore, StoreError, TelemetrySink, TemperatureSensor,
    WallClock, WeatherReport, WeatherSource, TOPIC_CONTROLLER_TELEMETRY,
};

const MIN_PLAUSIBLE_TEMP: f64 = -40.0;
const MAX_PLAUSIBLE_TEMP: f64 = 85.0;
/// Four publish intervals of the sensor feed.
pub const TEMPERATURE_MAX_AGE: Duration = Duration::from_secs(120);

/// Latest values received over MQTT, shared between the event loop and the
/// runtime's collaborators.
#[derive(Clone, Default)]
pub struct Readings {
    temperature: Arc<Mutex<Option<(f64, Instant)>>>,
    weather: Arc<Mutex<Option<WeatherReport>>>,
    connected: Arc<AtomicBool>,
}

impl Readings {
    pub fn set_temperature(&self, value: f64) {
        self.set_temperature_at(value, Instant::now());
    }

    fn set_temperature_at(&self, value: f64, received_at: Instant) {
        if let Ok(mut slot) = self.temperature.lock() {
            *slot = Some((value, received_at));
        }
    }

    pub fn set_weather(&self, report: WeatherReport) {
        if let Ok(mut slot) = self.weather.lock() {
            *slot = Some(report);
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

pub fn parse_temperature(payload: &str) -> Result<f64, SensorError> {
    let value = payload
        .trim()
        .parse::<f64>()
        .map_err(|err| SensorError::Unavailable(format!("unparsable reading: {err}")))?;
    if !value.is_finite() || !(MIN_PLAUSIBLE_TEMP..=MAX_PLAUSIBLE_TEMP).contains(&value) {
        return Err(SensorError::OutOfRange(value));
    }
    Ok(value)
}

/// Latest temperature from the sensor feed. A reading older than `max_age`
/// counts as missing.
pub struct MqttSensor {
    readings: Readings,
    max_age: Duration,
}

impl MqttSensor {
    pub fn new(readings: Readings, max_age: Duration) -> Self {
        Self { readings, max_age }
    }

    fn reading_at(&self, now: Instant) -> Result<f64, SensorError> {
        let slot = self
            .readings
            .temperature
            .lock()
            .map_err(|_| SensorError::Unavailable("reading cache poisoned".to_string()))?;
        let (value, received_at) = (*slot)
            .ok_or_else(|| SensorError::Unavailable("no temperature received yet".to_string()))?;

        let age = now.saturating_duration_since(received_at);
        if age > self.max_age {
            return Err(SensorError::Unavailable(format!(
                "last temperature is {}s old",
                age.as_secs()
            )));
        }
        Ok(value)
    }
}

impl TemperatureSensor for MqttSensor {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        self.reading_at(Instant::now())
    }
}

pub struct MqttWeather {
    readings: Readings,
}

impl MqttWeather {
    pub fn new(readings: Readings) -> Self {
        Self { readings }
    }
}

impl WeatherSource for MqttWeather {
    fn fetch(&mut self) -> Result<WeatherReport, NetworkError> {
        let slot = self
            .readings
            .weather
            .lock()
            .map_err(|_| NetworkError::Unreachable("weather cache poisoned".to_string()))?;
        slot.clone().ok_or(NetworkError::NoData("weather report topic"))
    }
}

pub struct MqttTelemetry {
    mqtt: AsyncClient,
}

impl MqttTelemetry {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self { mqtt }
    }
}

impl TelemetrySink for MqttTelemetry {
    fn upload(&mut self, record: &DiagnosticRecord) -> Result<(), NetworkError> {
        let body =
            serde_json::to_vec(record).map_err(|err| NetworkError::Encode(err.to_string()))?;
        self.mqtt
            .try_publish(TOPIC_CONTROLLER_TELEMETRY, QoS::AtLeastOnce, false, body)
            .map_err(|err| NetworkError::Unreachable(err.to_string()))
    }
}

/// Broker connection as seen by the runtime. The MQTT event loop reconnects
/// on its own, so a connect attempt only has to be noted.
pub struct BrokerLink {
    readings: Readings,
}

impl BrokerLink {
    pub fn new(readings: Readings) -> Self {
        Self { readings }
    }
}

impl Connectivity for BrokerLink {
    fn is_connected(&self) -> bool {
        self.readings.connected.load(Ordering::Relaxed)
    }

    fn begin_connect(&mut self) {
        debug!("waiting for mqtt event loop to reconnect");
    }
}

pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_utc(&self) -> Option<DateTime<Utc>> {
        Some(Utc::now())
    }
}

/// Hardware integration point for the servo PWM outputs.
pub struct LoggingServo {
    name: &'static str,
    angle: u8,
}

impl LoggingServo {
    pub fn new(name: &'static str) -> Self {
        Self { name, angle: 90 }
    }
}

impl ServoHardware for LoggingServo {
    fn write_angle(&mut self, angle: u8) {
        debug!(servo = self.name, angle, "servo write");
        self.angle = angle;
    }

    fn read_angle(&self) -> u8 {
        self.angle
    }
}

pub struct LoggingRail;

impl PowerRail for LoggingRail {
    fn set_power(&mut self, on: bool) {
        info!(on, "servo power rail");
    }
}

/// Settings persisted as a JSON object keyed by setting name. Every write is
/// flushed to disk before it returns.
pub struct FileSettingsStore {
    path: PathBuf,
    values: MemoryStore,
}

impl FileSettingsStore {
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let values = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<MemoryStore>(&raw)
                .with_context(|| format!("invalid settings file {}", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => MemoryStore::default(),
            Err(err) => return Err(err.into()),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(&self.values)
            .map_err(|err| StoreError::Persist(err.to_string()))?;
        std::fs::write(&self.path, payload).map_err(|err| StoreError::Persist(err.to_string()))
    }
}

impl SettingsStore for FileSettingsStore {
    fn read(&self, key: SettingKey) -> i32 {
        self.values.read(key)
    }

    fn write(&mut self, key: SettingKey, value: i32) -> Result<(), StoreError> {
        self.values.write(key, value)?;
        self.persist()
    }

    fn is_set(&self, key: SettingKey) -> bool {
        self.values.is_set(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_payloads_are_validated() {
        assert_eq!(parse_temperature(" 21.5\n"), Ok(21.5));
        assert_eq!(parse_temperature("120"), Err(SensorError::OutOfRange(120.0)));
        assert!(matches!(
            parse_temperature("warm"),
            Err(SensorError::Unavailable(_))
        ));
        assert!(matches!(
            parse_temperature("NaN"),
            Err(SensorError::OutOfRange(_))
        ));
    }

    #[test]
    fn sensor_reports_missing_reading() {
        let readings = Readings::default();
        let mut sensor = MqttSensor::new(readings.clone(), TEMPERATURE_MAX_AGE);
        assert!(sensor.read_temperature().is_err());

        readings.set_temperature(19.25);
        assert_eq!(sensor.read_temperature(), Ok(19.25));
    }

    #[test]
    fn stale_temperature_is_unavailable() {
        let readings = Readings::default();
        let sensor = MqttSensor::new(readings.clone(), Duration::from_secs(90));
        let received_at = Instant::now();
        readings.set_temperature_at(21.0, received_at);

        assert_eq!(
            sensor.reading_at(received_at + Duration::from_secs(60)),
            Ok(21.0)
        );
        assert!(matches!(
            sensor.reading_at(received_at + Duration::from_secs(91)),
            Err(SensorError::Unavailable(_))
        ));

        readings.set_temperature_at(22.5, received_at + Duration::from_secs(91));
        assert_eq!(
            sensor.reading_at(received_at + Duration::from_secs(100)),
            Ok(22.5)
        );
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("window-opener-store-{}", std::process::id()));
        let path = dir.join("settings.json");
        let _ = std::fs::remove_file(&path);

        let mut store = FileSettingsStore::open(path.clone()).await.unwrap();
        store.write(SettingKey::OptimalTemperature, 23).unwrap();
        store.write(SettingKey::OTermNegative, 35).unwrap();

        let reopened = FileSettingsStore::open(path.clone()).await.unwrap();
        assert_eq!(reopened.read(SettingKey::OptimalTemperature), 23);
        assert_eq!(reopened.read(SettingKey::OTermNegative), 35);
        assert!(!reopened.is_set(SettingKey::ITerm));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"OPTIMAL_TEMPERATURE\": 23"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
