//! Class rebalancing on the training view
//!
//! Samplers pick row indices and take them from the training frame, so
//! feature columns of any dtype survive resampling. Only the training view
//! is touched.

use super::{Algorithm, AlgorithmFactory, CustomApplier, ParamReader, Parameters, RuntimeContext};
use crate::dataset::{series_to_array, Dataset};
use crate::error::{KolosalError, Result};
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Row indices per class label, in label order
fn class_indices(y: &Series) -> Result<BTreeMap<i64, Vec<usize>>> {
    let values = series_to_array(y)?;
    let mut indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &label) in values.iter().enumerate() {
        indices.entry(label.round() as i64).or_default().push(i);
    }
    Ok(indices)
}

fn take(x: &DataFrame, y: &Series, mut rows: Vec<usize>) -> Result<(DataFrame, Series)> {
    rows.sort_unstable();
    let idx = IdxCa::from_vec("idx".into(), rows.into_iter().map(|r| r as IdxSize).collect());
    Ok((x.take(&idx)?, y.take(&idx)?))
}

/// Random oversampler (duplicates minority samples)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomOverSampler {
    /// Target size of each class relative to the majority class
    sampling_strategy: f64,
    seed: u64,
}

impl RandomOverSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            sampling_strategy: 1.0,
            seed,
        }
    }

    pub fn with_sampling_strategy(mut self, ratio: f64) -> Self {
        self.sampling_strategy = ratio.clamp(0.1, 10.0);
        self
    }

    /// Indices of the resampled training rows
    pub fn sample_indices(&self, y: &Series) -> Result<Vec<usize>> {
        let indices = class_indices(y)?;
        let max_count = indices.values().map(Vec::len).max().unwrap_or(0);
        let target = (max_count as f64 * self.sampling_strategy) as usize;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut rows: Vec<usize> = (0..y.len()).collect();
        for class_idx in indices.values() {
            let n_to_add = target.saturating_sub(class_idx.len());
            for _ in 0..n_to_add {
                rows.push(class_idx[rng.gen_range(0..class_idx.len())]);
            }
        }
        Ok(rows)
    }
}

impl CustomApplier for RandomOverSampler {
    fn apply(&mut self, dataset: &mut Dataset) -> Result<()> {
        let (x, y) = dataset.training()?;
        let rows = self.sample_indices(y)?;
        debug!(before = y.len(), after = rows.len(), "Oversampling training rows");
        let (x, y) = take(x, y, rows)?;
        dataset.set_training(x, y)
    }
}

/// Random undersampler (removes majority samples)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomUnderSampler {
    /// Ratio of minority to majority after sampling
    sampling_strategy: f64,
    seed: u64,
}

impl RandomUnderSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            sampling_strategy: 1.0,
            seed,
        }
    }

    pub fn with_sampling_strategy(mut self, ratio: f64) -> Self {
        self.sampling_strategy = ratio.clamp(0.1, 10.0);
        self
    }

    pub fn sample_indices(&self, y: &Series) -> Result<Vec<usize>> {
        let indices = class_indices(y)?;
        let min_count = indices.values().map(Vec::len).min().unwrap_or(0);
        let target = (min_count as f64 / self.sampling_strategy) as usize;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut rows = Vec::new();
        for class_idx in indices.values() {
            let mut shuffled = class_idx.clone();
            shuffled.shuffle(&mut rng);
            rows.extend(shuffled.into_iter().take(target.min(class_idx.len())));
        }
        Ok(rows)
    }
}

impl CustomApplier for RandomUnderSampler {
    fn apply(&mut self, dataset: &mut Dataset) -> Result<()> {
        let (x, y) = dataset.training()?;
        let rows = self.sample_indices(y)?;
        if rows.is_empty() {
            return Err(KolosalError::DataError(
                "undersampling left no training rows".to_string(),
            ));
        }
        debug!(before = y.len(), after = rows.len(), "Undersampling training rows");
        let (x, y) = take(x, y, rows)?;
        dataset.set_training(x, y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SamplerKind {
    Over,
    Under,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerFactory {
    kind: SamplerKind,
}

impl AlgorithmFactory for SamplerFactory {
    fn name(&self) -> &str {
        match self.kind {
            SamplerKind::Over => "random_over",
            SamplerKind::Under => "random_under",
        }
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([
            ("sampling_strategy".to_string(), Value::from(1.0)),
            ("random_state".to_string(), Value::from(0u64)),
        ])
    }

    fn runtime_parameters(&self, context: &RuntimeContext) -> Parameters {
        Parameters::from([("random_state".to_string(), Value::from(context.seed))])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(self.name(), parameters, &["sampling_strategy", "random_state"])?;
        let ratio = reader.f64("sampling_strategy", 1.0)?;
        let seed = reader.u64("random_state", 0)?;

        let applier: Box<dyn CustomApplier> = match self.kind {
            SamplerKind::Over => Box::new(RandomOverSampler::new(seed).with_sampling_strategy(ratio)),
            SamplerKind::Under => {
                Box::new(RandomUnderSampler::new(seed).with_sampling_strategy(ratio))
            }
        };
        Ok(Algorithm::Custom(applier))
    }
}

/// Symbols exported to the technique loader
pub fn symbols() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)> {
    vec![
        ("RandomOverSampler", Arc::new(SamplerFactory { kind: SamplerKind::Over })),
        ("RandomUnderSampler", Arc::new(SamplerFactory { kind: SamplerKind::Under })),
    ]
}
