use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{config::SettingKey, error::StoreError};

/// Narrow view of the persistent key-value memory holding controller settings
/// and servo calibration bounds.
pub trait SettingsStore: Send {
    /// Raw stored integer; `0` when the key has never been written.
    fn read(&self, key: SettingKey) -> i32;
    fn write(&mut self, key: SettingKey, value: i32) -> Result<(), StoreError>;
    fn is_set(&self, key: SettingKey) -> bool;
}

/// Volatile store; also the serialized form of the host's settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryStore {
    values: BTreeMap<SettingKey, i32>,
}

impl SettingsStore for MemoryStore {
    fn read(&self, key: SettingKey) -> i32 {
        self.values.get(&key).copied().unwrap_or(0)
    }

    fn write(&mut self, key: SettingKey, value: i32) -> Result<(), StoreError> {
        self.values.insert(key, value);
        Ok(())
    }

    fn is_set(&self, key: SettingKey) -> bool {
        self.values.contains_key(&key)
    }
}
