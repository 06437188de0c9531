//! Cartesian expansion of per-stage candidate lists
//!
//! The last stage in the order varies fastest, so for order
//! `[scaler, model]` and options `{scaler: [none, standard], model: [logit,
//! forest]}` the configurations are numbered
//! `(none, logit), (none, forest), (standard, logit), (standard, forest)`.

use super::configuration::Configuration;
use crate::algorithms::Parameters;
use crate::error::{KolosalError, Result};
use crate::registry::NONE_TECHNIQUE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

fn first_duplicate(names: &[String]) -> Option<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .find(|name| !seen.insert(name.as_str()))
        .cloned()
}

/// Candidate technique names per stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    options: BTreeMap<String, Vec<String>>,
}

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage<S: Into<String>>(
        mut self,
        stage: impl Into<String>,
        candidates: impl IntoIterator<Item = S>,
    ) -> Self {
        self.insert(stage, candidates);
        self
    }

    pub fn insert<S: Into<String>>(
        &mut self,
        stage: impl Into<String>,
        candidates: impl IntoIterator<Item = S>,
    ) {
        self.options
            .insert(stage.into(), candidates.into_iter().map(Into::into).collect());
    }

    /// Validate raw settings values: a list of strings, a single string,
    /// or null/empty (meaning `["none"]`)
    pub fn from_settings(section: &Parameters) -> Result<Self> {
        let mut options = Self::new();
        for (stage, value) in section {
            let candidates = match value {
                Value::Null => Vec::new(),
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            KolosalError::ConfigurationGeneration(format!(
                                "stage '{}' has a non-string candidate: {}",
                                stage, item
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                other => {
                    return Err(KolosalError::ConfigurationGeneration(format!(
                        "stage '{}' candidates must be a list of technique names, got {}",
                        stage, other
                    )))
                }
            };
            options.insert(stage.as_str(), candidates);
        }
        Ok(options)
    }

    /// Candidates for a stage; missing or empty lists become `["none"]`
    pub fn candidates(&self, stage: &str) -> Vec<String> {
        match self.options.get(stage) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => vec![NONE_TECHNIQUE.to_string()],
        }
    }

    /// Stage names that have an entry, sorted
    pub fn stages(&self) -> Vec<String> {
        self.options.keys().cloned().collect()
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.options.contains_key(stage)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Expands stage options into numbered configurations
#[derive(Debug, Clone)]
pub struct ConfigurationGenerator {
    stage_order: Arc<[String]>,
}

impl ConfigurationGenerator {
    /// Rejects an empty order and duplicate stage names
    pub fn new<S: Into<String>>(stage_order: impl IntoIterator<Item = S>) -> Result<Self> {
        let stage_order: Vec<String> = stage_order.into_iter().map(Into::into).collect();
        if stage_order.is_empty() {
            return Err(KolosalError::ConfigurationGeneration(
                "stage order is empty".to_string(),
            ));
        }
        if let Some(dup) = first_duplicate(&stage_order) {
            return Err(KolosalError::ConfigurationGeneration(format!(
                "stage '{}' appears twice in the stage order",
                dup
            )));
        }
        Ok(Self {
            stage_order: stage_order.into(),
        })
    }

    pub fn stage_order(&self) -> &Arc<[String]> {
        &self.stage_order
    }

    /// Candidate lists in stage order, validated
    fn candidate_lists(&self, options: &StageOptions) -> Result<Vec<Vec<String>>> {
        if let Some(stray) = options
            .stages()
            .into_iter()
            .find(|s| !self.stage_order.contains(s))
        {
            return Err(KolosalError::ConfigurationGeneration(format!(
                "options name stage '{}' which is not in the stage order",
                stray
            )));
        }

        self.stage_order
            .iter()
            .map(|stage| {
                let list = options.candidates(stage);
                if let Some(dup) = first_duplicate(&list) {
                    return Err(KolosalError::ConfigurationGeneration(format!(
                        "stage '{}' lists technique '{}' twice",
                        stage, dup
                    )));
                }
                Ok(list)
            })
            .collect()
    }

    /// Number of configurations `generate` would produce
    pub fn count(&self, options: &StageOptions) -> Result<usize> {
        Ok(self
            .candidate_lists(options)?
            .iter()
            .map(Vec::len)
            .product())
    }

    /// Technique assignments in enumeration order, without building stages
    pub fn plan(&self, options: &StageOptions) -> Result<Vec<Vec<String>>> {
        let lists = self.candidate_lists(options)?;
        let total: usize = lists.iter().map(Vec::len).product();

        let mut plan = Vec::with_capacity(total);
        let mut cursor = vec![0usize; lists.len()];
        for _ in 0..total {
            plan.push(
                cursor
                    .iter()
                    .zip(&lists)
                    .map(|(&i, list)| list[i].clone())
                    .collect(),
            );
            // odometer: last stage fastest
            for pos in (0..lists.len()).rev() {
                cursor[pos] += 1;
                if cursor[pos] < lists[pos].len() {
                    break;
                }
                cursor[pos] = 0;
            }
        }
        Ok(plan)
    }

    /// Build every configuration, numbered from 1 in enumeration order
    pub fn generate(&self, options: &StageOptions) -> Result<Vec<Configuration>> {
        self.plan(options)?
            .into_iter()
            .enumerate()
            .map(|(i, techniques)| {
                let names: Vec<&str> = techniques.iter().map(String::as_str).collect();
                Configuration::new(i + 1, Arc::clone(&self.stage_order), &names)
            })
            .collect()
    }
}

/// Expand `options` over `stage_order` into numbered configurations
pub fn generate<S: Into<String>>(
    stage_order: impl IntoIterator<Item = S>,
    options: &StageOptions,
) -> Result<Vec<Configuration>> {
    ConfigurationGenerator::new(stage_order)?.generate(options)
}
