//! Typed run configuration read from [`Settings`]

use super::settings::Settings;
use crate::dataset::{DataSplit, SplitSettings, SplitStrategy};
use crate::error::{KolosalError, Result};
use crate::grid::MetricKind;
use crate::recipe::StageOptions;
use crate::registry::DEFAULT_STAGE_ORDER;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for a grid run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Seed for splitting and seeded techniques
    pub seed: u64,

    /// Label column name
    pub label: String,

    /// Log every results row, not only new bests
    pub verbose: bool,

    /// Explicit stage order; defaults to the canonical order filtered to
    /// the configured stages
    pub stage_order: Option<Vec<String>>,

    /// Which split passes run for each configuration
    pub split: SplitStrategy,

    pub test_size: f64,

    pub val_size: f64,

    /// Metrics scored per row; the first is primary unless overridden
    pub metrics: Vec<MetricKind>,

    pub primary_metric: Option<MetricKind>,

    /// Save every configuration snapshot, not only the best
    pub export_all_configurations: bool,

    /// Release configurations once their rows are recorded
    pub conserve_memory: bool,

    /// Worker threads for parallel runs; `None` runs sequentially
    pub parallelism: Option<usize>,

    /// Candidate techniques per stage
    pub techniques: StageOptions,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            label: "target".to_string(),
            verbose: false,
            stage_order: None,
            split: SplitStrategy::TrainTest,
            test_size: 0.33,
            val_size: 0.2,
            metrics: vec![MetricKind::Accuracy],
            primary_metric: None,
            export_all_configurations: false,
            conserve_memory: false,
            parallelism: None,
            techniques: StageOptions::new(),
        }
    }
}

fn expect_u64(section: &str, key: &str, value: &Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| wrong_type(section, key, "a non-negative integer", value))
}

fn expect_f64(section: &str, key: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| wrong_type(section, key, "a number", value))
}

fn expect_bool(section: &str, key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| wrong_type(section, key, "a boolean", value))
}

fn expect_str<'a>(section: &str, key: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| wrong_type(section, key, "a string", value))
}

/// A string or a list of strings
fn expect_strings(section: &str, key: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| expect_str(section, key, item).map(str::to_string))
            .collect(),
        other => Err(wrong_type(section, key, "a list of strings", other)),
    }
}

fn wrong_type(section: &str, key: &str, expected: &str, value: &Value) -> KolosalError {
    KolosalError::ConfigError(format!("{}.{} must be {}, got {}", section, key, expected, value))
}

impl GridConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the `general`, `recipes` and `techniques` sections. Missing keys
    /// keep their defaults; the result is validated.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut config = Self::default();

        if let Some(general) = settings.section("general") {
            for (key, value) in general {
                match key.as_str() {
                    "seed" => config.seed = expect_u64("general", key, value)?,
                    "label" => config.label = expect_str("general", key, value)?.to_string(),
                    "verbose" => config.verbose = expect_bool("general", key, value)?,
                    _ => {}
                }
            }
        }

        if let Some(recipes) = settings.section("recipes") {
            for (key, value) in recipes {
                match key.as_str() {
                    "order" => config.stage_order = Some(expect_strings("recipes", key, value)?),
                    "data_to_use" => config.split = expect_str("recipes", key, value)?.parse()?,
                    "test_size" => config.test_size = expect_f64("recipes", key, value)?,
                    "val_size" => config.val_size = expect_f64("recipes", key, value)?,
                    "metrics" => {
                        config.metrics = expect_strings("recipes", key, value)?
                            .iter()
                            .map(|m| m.parse())
                            .collect::<Result<_>>()?
                    }
                    "primary_metric" => {
                        config.primary_metric = Some(expect_str("recipes", key, value)?.parse()?)
                    }
                    "export_all_configurations" => {
                        config.export_all_configurations = expect_bool("recipes", key, value)?
                    }
                    "conserve_memory" => config.conserve_memory = expect_bool("recipes", key, value)?,
                    "parallelism" => {
                        config.parallelism = match value {
                            Value::Null => None,
                            other => Some(expect_u64("recipes", key, other)? as usize),
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(techniques) = settings.section("techniques") {
            config.techniques = StageOptions::from_settings(techniques)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_stage_order<S: Into<String>>(mut self, order: impl IntoIterator<Item = S>) -> Self {
        self.stage_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_split(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }

    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    pub fn with_val_size(mut self, val_size: f64) -> Self {
        self.val_size = val_size;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricKind>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_primary_metric(mut self, metric: MetricKind) -> Self {
        self.primary_metric = Some(metric);
        self
    }

    pub fn with_techniques(mut self, techniques: StageOptions) -> Self {
        self.techniques = techniques;
        self
    }

    pub fn with_export_all(mut self, export: bool) -> Self {
        self.export_all_configurations = export;
        self
    }

    pub fn with_conserve_memory(mut self, conserve: bool) -> Self {
        self.conserve_memory = conserve;
        self
    }

    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }

    /// Metric the best tracker compares on
    pub fn primary_metric(&self) -> MetricKind {
        self.primary_metric
            .or_else(|| self.metrics.first().copied())
            .unwrap_or(MetricKind::Accuracy)
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn split_settings(&self) -> SplitSettings {
        SplitSettings {
            test_size: self.test_size,
            val_size: self.val_size,
            seed: self.seed,
        }
    }

    /// The explicit order, or the canonical order keeping configured stages.
    /// Stages outside the canonical order need an explicit order.
    pub fn resolved_stage_order(&self) -> Result<Vec<String>> {
        if let Some(order) = &self.stage_order {
            return Ok(order.clone());
        }
        if let Some(stray) = self
            .techniques
            .stages()
            .into_iter()
            .find(|s| !DEFAULT_STAGE_ORDER.contains(&s.as_str()))
        {
            return Err(KolosalError::ConfigError(format!(
                "stage '{}' is not in the default order; set recipes.order",
                stray
            )));
        }
        let order: Vec<String> = DEFAULT_STAGE_ORDER
            .iter()
            .filter(|s| self.techniques.contains(s))
            .map(|s| s.to_string())
            .collect();
        if order.is_empty() {
            return Err(KolosalError::ConfigError(
                "no stages configured; add a techniques section".to_string(),
            ));
        }
        Ok(order)
    }

    /// Validate fractions, metrics and thread count
    pub fn validate(&self) -> Result<()> {
        let passes = self.split.passes();
        let needs_test = passes.iter().any(|p| *p != DataSplit::Full);
        if needs_test && !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(KolosalError::ConfigError(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        let needs_val = passes.contains(&DataSplit::TrainVal);
        if needs_val && !(self.val_size > 0.0 && self.val_size < 1.0) {
            return Err(KolosalError::ConfigError(format!(
                "val_size must be in (0, 1) for {:?} splits, got {}",
                self.split, self.val_size
            )));
        }
        if self.metrics.is_empty() {
            return Err(KolosalError::ConfigError("metrics must not be empty".to_string()));
        }
        if let Some(primary) = self.primary_metric {
            if !self.metrics.contains(&primary) {
                return Err(KolosalError::ConfigError(format!(
                    "primary metric '{}' is not among the scored metrics",
                    primary
                )));
            }
        }
        if self.parallelism == Some(0) {
            return Err(KolosalError::ConfigError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.label.is_empty() {
            return Err(KolosalError::ConfigError("label must not be empty".to_string()));
        }
        Ok(())
    }
}
