//! One numbered assignment of techniques to stages

use super::stage::{Stage, StageSnapshot};
use crate::algorithms::RuntimeContext;
use crate::config::Settings;
use crate::dataset::Dataset;
use crate::error::{KolosalError, Result};
use crate::registry::TechniqueRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A recipe: exactly one technique per stage, applied in `stage_order`
#[derive(Debug)]
pub struct Configuration {
    number: usize,
    stage_order: Arc<[String]>,
    stages: HashMap<String, Stage>,
}

/// Serializable view of a configuration, written by exporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub number: usize,
    pub stages: Vec<StageSnapshot>,
}

impl ConfigurationSnapshot {
    /// Technique of the last stage
    pub fn terminal_technique(&self) -> &str {
        self.stages.last().map(|s| s.technique.as_str()).unwrap_or("none")
    }

    /// `configuration_<n>_<terminal technique>`
    pub fn file_stem(&self) -> String {
        format!("configuration_{}_{}", self.number, self.terminal_technique())
    }
}

impl Configuration {
    /// Build from `(stage, technique)` pairs in stage order; the last stage is terminal
    pub fn new(number: usize, stage_order: Arc<[String]>, techniques: &[&str]) -> Result<Self> {
        if techniques.len() != stage_order.len() {
            return Err(KolosalError::ConfigurationGeneration(format!(
                "{} techniques for {} stages",
                techniques.len(),
                stage_order.len()
            )));
        }
        let last = stage_order.len().saturating_sub(1);
        let stages = stage_order
            .iter()
            .zip(techniques)
            .enumerate()
            .map(|(i, (name, technique))| (name.clone(), Stage::new(name.as_str(), *technique, i == last)))
            .collect();

        Ok(Self {
            number,
            stage_order,
            stages,
        })
    }

    /// 1-based position in generation order
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn stage_order(&self) -> &Arc<[String]> {
        &self.stage_order
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    /// Stages in execution order
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stage_order.iter().filter_map(|name| self.stages.get(name))
    }

    /// Technique chosen for each stage, in stage order
    pub fn techniques(&self) -> Vec<(String, String)> {
        self.stages()
            .map(|s| (s.name().to_string(), s.technique().to_string()))
            .collect()
    }

    pub fn technique(&self, stage: &str) -> Option<&str> {
        self.stages.get(stage).map(Stage::technique)
    }

    /// Technique of the terminal stage
    pub fn terminal_technique(&self) -> &str {
        self.stage_order
            .last()
            .and_then(|name| self.technique(name))
            .unwrap_or("none")
    }

    /// Replace a stage's caller overrides before finalize
    pub fn set_overrides(&mut self, stage: &str, overrides: crate::algorithms::Parameters) -> Result<()> {
        let current = self
            .stages
            .remove(stage)
            .ok_or_else(|| KolosalError::ConfigError(format!("no stage named '{}'", stage)))?;
        self.stages
            .insert(stage.to_string(), current.with_parameters(overrides));
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.stages.values().all(Stage::is_finalized)
    }

    /// Finalize every stage, in stage order
    pub fn finalize(
        &mut self,
        registry: &TechniqueRegistry,
        context: &RuntimeContext,
        settings: &Settings,
    ) -> Result<()> {
        for name in self.stage_order.iter() {
            if let Some(stage) = self.stages.get_mut(name) {
                stage.finalize(registry, context, settings)?;
            }
        }
        Ok(())
    }

    /// Apply every stage in order; each sees the dataset left by the previous one
    pub fn apply(&mut self, dataset: &mut Dataset) -> Result<()> {
        for name in self.stage_order.iter() {
            if let Some(stage) = self.stages.get_mut(name) {
                stage.apply(dataset)?;
            }
        }
        Ok(())
    }

    /// `configuration_<n>_<terminal technique>`
    pub fn file_stem(&self) -> String {
        format!("configuration_{}_{}", self.number, self.terminal_technique())
    }

    pub fn snapshot(&self) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            number: self.number,
            stages: self.stages().map(Stage::snapshot).collect(),
        }
    }
}
