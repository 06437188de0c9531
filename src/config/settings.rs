//! Two-level settings map: section -> key -> value

use crate::algorithms::Parameters;
use crate::error::{KolosalError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Raw settings as loaded from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    sections: BTreeMap<String, Parameters>,
}

fn section_from_value(name: &str, value: Value) -> Result<Parameters> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Null => Ok(Parameters::new()),
        other => Err(KolosalError::ConfigError(format!(
            "settings section '{}' must be an object, got {}",
            name, other
        ))),
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of objects
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(KolosalError::ConfigError(format!(
                    "settings must be a JSON object, got {}",
                    other
                )))
            }
        };
        let mut settings = Self::new();
        for (name, section) in map {
            let params = section_from_value(&name, section)?;
            settings.sections.insert(name, params);
        }
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Builder form of [`Settings::set_section`] taking a JSON object
    pub fn with_section(mut self, name: impl Into<String>, value: Value) -> Result<Self> {
        let name = name.into();
        let params = section_from_value(&name, value)?;
        self.sections.insert(name, params);
        Ok(self)
    }

    pub fn set_section(&mut self, name: impl Into<String>, params: Parameters) {
        self.sections.insert(name.into(), params);
    }

    pub fn section(&self, name: &str) -> Option<&Parameters> {
        self.sections.get(name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    pub fn set(&mut self, section: &str, key: impl Into<String>, value: Value) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }
}
