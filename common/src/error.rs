use thiserror::Error;

use crate::config::SettingKey;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("temperature history is empty; seed a bootstrap sample first")]
    EmptyHistory,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkError {
    #[error("network unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
    #[error("no data available from {0}")]
    NoData(&'static str),
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("temperature sensor unavailable: {0}")]
    Unavailable(String),
    #[error("temperature reading out of range: {0}")]
    OutOfRange(f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("unknown setting key: {0}")]
    UnknownKey(String),
    #[error("value {value} out of range for {key}")]
    OutOfRange { key: SettingKey, value: i32 },
    #[error("failed to persist settings: {0}")]
    Persist(String),
}
