//! YAML config merger. Adds new top-level keys shipped by a release to an
//! operator's config file without clobbering their customizations.

use std::path::Path;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::adapters::ConfigMerger;
use crate::error::AdapterError;

pub struct YamlConfigMerger;

impl YamlConfigMerger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YamlConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn read_mapping(path: &Path) -> Result<Mapping, AdapterError> {
    let display = path.display().to_string();
    let contents =
        std::fs::read_to_string(path).map_err(|e| AdapterError::io(display.clone(), e))?;
    if contents.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(&contents)
        .map_err(|e| AdapterError::config(display.clone(), e.to_string()))?;
    match value {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(AdapterError::config(
            display,
            "expected a top-level mapping",
        )),
    }
}

fn write_mapping(path: &Path, map: &Mapping) -> Result<(), AdapterError> {
    let display = path.display().to_string();
    let contents = serde_yaml::to_string(&Value::Mapping(map.clone()))
        .map_err(|e| AdapterError::config(display.clone(), e.to_string()))?;
    std::fs::write(path, contents).map_err(|e| AdapterError::io(display, e))
}

fn parse_scalar(path: &Path, value: &str) -> Result<Value, AdapterError> {
    serde_yaml::from_str(value)
        .map_err(|e| AdapterError::config(path.display().to_string(), e.to_string()))
}

#[async_trait]
impl ConfigMerger for YamlConfigMerger {
    async fn merge_config(&self, existing: &Path, template: &Path) -> Result<(), AdapterError> {
        let mut current = read_mapping(existing)?;
        let shipped = read_mapping(template)?;

        let mut added = 0usize;
        for (key, value) in shipped {
            if !current.contains_key(&key) {
                current.insert(key, value);
                added += 1;
            }
        }

        if added > 0 {
            write_mapping(existing, &current)?;
        }
        debug!(
            "merged {} new key(s) from {} into {}",
            added,
            template.display(),
            existing.display()
        );
        Ok(())
    }

    async fn add_config_key(
        &self,
        path: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        let mut current = read_mapping(path)?;
        let key = Value::String(key.to_string());
        if current.contains_key(&key) {
            // Operator already has the key, possibly customized. Leave it.
            return Ok(());
        }
        current.insert(key, parse_scalar(path, value)?);
        write_mapping(path, &current)
    }

    async fn edit_config_key(
        &self,
        path: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        let mut current = read_mapping(path)?;
        let key_value = Value::String(key.to_string());
        if !current.contains_key(&key_value) {
            return Err(AdapterError::config(
                path.display().to_string(),
                format!("cannot edit missing key '{key}'"),
            ));
        }
        current.insert(key_value, parse_scalar(path, value)?);
        write_mapping(path, &current)
    }
}
