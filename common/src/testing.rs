//! Collaborator doubles shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::{
    error::{NetworkError, SensorError},
    hal::{
        Connectivity, PowerRail, ServoHardware, TelemetrySink, TemperatureSensor, WallClock,
        WeatherSource,
    },
    types::{DiagnosticRecord, WeatherReport},
};

#[derive(Debug, Clone, Default)]
pub struct RecordingRail {
    history: Arc<Mutex<Vec<bool>>>,
}

impl RecordingRail {
    pub fn history(&self) -> Vec<bool> {
        self.history.lock().unwrap().clone()
    }

    pub fn is_on(&self) -> bool {
        self.history.lock().unwrap().last().copied().unwrap_or(false)
    }
}

impl PowerRail for RecordingRail {
    fn set_power(&mut self, on: bool) {
        self.history.lock().unwrap().push(on);
    }
}

#[derive(Debug, Default)]
struct ServoLog {
    angle: u8,
    /// (angle, rail powered at the time of the write)
    writes: Vec<(u8, bool)>,
}

#[derive(Debug, Clone)]
pub struct RecordingServo {
    log: Arc<Mutex<ServoLog>>,
    rail: RecordingRail,
}

impl RecordingServo {
    pub fn new(rail: &RecordingRail, angle: u8) -> Self {
        Self {
            log: Arc::new(Mutex::new(ServoLog {
                angle,
                writes: Vec::new(),
            })),
            rail: rail.clone(),
        }
    }

    pub fn angle(&self) -> u8 {
        self.log.lock().unwrap().angle
    }

    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.log.lock().unwrap().writes.clone()
    }

    pub fn set_angle(&self, angle: u8) {
        self.log.lock().unwrap().angle = angle;
    }
}

impl ServoHardware for RecordingServo {
    fn write_angle(&mut self, angle: u8) {
        let powered = self.rail.is_on();
        let mut log = self.log.lock().unwrap();
        log.angle = angle;
        log.writes.push((angle, powered));
    }

    fn read_angle(&self) -> u8 {
        self.angle()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    readings: Arc<Mutex<VecDeque<Result<f64, SensorError>>>>,
    fallback: Arc<Mutex<f64>>,
}

impl ScriptedSensor {
    pub fn constant(value: f64) -> Self {
        let sensor = Self::default();
        *sensor.fallback.lock().unwrap() = value;
        sensor
    }

    pub fn push(&self, reading: Result<f64, SensorError>) {
        self.readings.lock().unwrap().push_back(reading);
    }

    pub fn set(&self, value: f64) {
        *self.fallback.lock().unwrap() = value;
    }
}

impl TemperatureSensor for ScriptedSensor {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        match self.readings.lock().unwrap().pop_front() {
            Some(reading) => reading,
            None => Ok(*self.fallback.lock().unwrap()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedWeather {
    responses: Arc<Mutex<VecDeque<Result<WeatherReport, NetworkError>>>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedWeather {
    pub fn push(&self, response: Result<WeatherReport, NetworkError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl WeatherSource for ScriptedWeather {
    fn fetch(&mut self) -> Result<WeatherReport, NetworkError> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(NetworkError::NoData("scripted weather")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    uploaded: Arc<Mutex<Vec<DiagnosticRecord>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingTelemetry {
    pub fn uploaded(&self) -> Vec<DiagnosticRecord> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn upload(&mut self, record: &DiagnosticRecord) -> Result<(), NetworkError> {
        if *self.fail.lock().unwrap() {
            return Err(NetworkError::UnexpectedStatus(500));
        }
        self.uploaded.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeLink {
    connected: Arc<Mutex<bool>>,
    attempts: Arc<Mutex<usize>>,
}

impl FakeLink {
    pub fn connected() -> Self {
        let link = Self::default();
        link.set_connected(true);
        link
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock().unwrap() = connected;
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl Connectivity for FakeLink {
    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn begin_connect(&mut self) {
        *self.attempts.lock().unwrap() += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    now: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        let clock = Self::default();
        clock.set(Some(now));
        clock
    }

    pub fn set(&self, now: Option<DateTime<Utc>>) {
        *self.now.lock().unwrap() = now;
    }
}

impl WallClock for FixedClock {
    fn now_utc(&self) -> Option<DateTime<Utc>> {
        *self.now.lock().unwrap()
    }
}
