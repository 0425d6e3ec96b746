use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use pillwatch_types::{
    frame::EncodedImage,
    geometry::{GridPosition, Rectangle},
    Result,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::ops_error;

pub const MASTER_REGION_KEY: &str = "master_region";
pub const BASELINES_KEY: &str = "baselines";

/// Optional key-value persistence. The session works the same without one.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Baselines are stored by grid slot, since cell ids change on every regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBaseline {
    pub position: GridPosition,
    pub image: EncodedImage,
}

pub fn load<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str) -> Result<Option<T>> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| ops_error(format!("stored setting {key} is malformed: {err}")))
}

pub fn save<T: Serialize>(store: &dyn SettingsStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)
        .map_err(|err| ops_error(format!("cannot serialize setting {key}: {err}")))?;
    store.set(key, value)
}

pub fn load_region(store: &dyn SettingsStore) -> Result<Option<Rectangle>> {
    load(store, MASTER_REGION_KEY)
}

pub fn save_region(store: &dyn SettingsStore, region: Option<&Rectangle>) -> Result<()> {
    match region {
        Some(region) => save(store, MASTER_REGION_KEY, region),
        None => store.remove(MASTER_REGION_KEY),
    }
}

pub fn load_baselines(store: &dyn SettingsStore) -> Result<Vec<StoredBaseline>> {
    Ok(load(store, BASELINES_KEY)?.unwrap_or_default())
}

pub fn save_baselines(store: &dyn SettingsStore, baselines: &[StoredBaseline]) -> Result<()> {
    if baselines.is_empty() {
        store.remove(BASELINES_KEY)
    } else {
        save(store, BASELINES_KEY, &baselines)
    }
}

/// Process-lifetime store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ops_error("settings store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| ops_error("settings store lock poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| ops_error("settings store lock poisoned"))?
            .remove(key);
        Ok(())
    }
}
