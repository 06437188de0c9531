//! Typed access to finalized parameters

use crate::error::{KolosalError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Finalized stage parameters, ordered by name
pub type Parameters = BTreeMap<String, Value>;

/// Reads parameters for one technique, rejecting names it does not know
#[derive(Debug, Clone, Copy)]
pub struct ParamReader<'a> {
    technique: &'a str,
    params: &'a Parameters,
}

impl<'a> ParamReader<'a> {
    /// Fails with `InvalidParameter` if `params` holds a name outside `known`
    pub fn new(technique: &'a str, params: &'a Parameters, known: &[&str]) -> Result<Self> {
        if let Some((name, value)) = params.iter().find(|(k, _)| !known.contains(&k.as_str())) {
            return Err(KolosalError::invalid_parameter(
                name.as_str(),
                value,
                format!("not a parameter of '{}'", technique),
            ));
        }
        Ok(Self { technique, params })
    }

    pub fn f64(&self, name: &str, default: f64) -> Result<f64> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| self.type_error(name, v, "expected a number")),
        }
    }

    pub fn usize(&self, name: &str, default: usize) -> Result<usize> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| self.type_error(name, v, "expected a non-negative integer")),
        }
    }

    pub fn u64(&self, name: &str, default: u64) -> Result<u64> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| self.type_error(name, v, "expected a non-negative integer")),
        }
    }

    pub fn bool(&self, name: &str, default: bool) -> Result<bool> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| self.type_error(name, v, "expected a boolean")),
        }
    }

    pub fn string(&self, name: &str, default: &str) -> Result<String> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| self.type_error(name, v, "expected a string")),
        }
    }

    /// A list of column names; a single string counts as one name
    pub fn strings(&self, name: &str) -> Result<Option<Vec<String>>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.type_error(name, item, "expected strings"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(v) => Err(self.type_error(name, v, "expected a list of strings")),
        }
    }

    fn type_error(&self, name: &str, value: &Value, reason: &str) -> KolosalError {
        KolosalError::invalid_parameter(
            format!("{}.{}", self.technique, name),
            value,
            reason,
        )
    }
}
