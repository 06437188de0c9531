//! Train/test/validation splitting

use crate::error::{KolosalError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Run-level split strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Train and evaluate on the full set
    Full,
    /// Evaluate on a held-out test set
    TrainTest,
    /// Evaluate on a validation set carved from the training portion
    TrainVal,
    /// `TrainTest` then `TrainVal`, one results row each
    TrainTestVal,
}

impl SplitStrategy {
    /// Split passes run for every configuration, in order
    pub fn passes(&self) -> Vec<DataSplit> {
        match self {
            SplitStrategy::Full => vec![DataSplit::Full],
            SplitStrategy::TrainTest => vec![DataSplit::TrainTest],
            SplitStrategy::TrainVal => vec![DataSplit::TrainVal],
            SplitStrategy::TrainTestVal => vec![DataSplit::TrainTest, DataSplit::TrainVal],
        }
    }
}

impl Default for SplitStrategy {
    fn default() -> Self {
        SplitStrategy::TrainTest
    }
}

impl FromStr for SplitStrategy {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(SplitStrategy::Full),
            "train_test" => Ok(SplitStrategy::TrainTest),
            "train_val" => Ok(SplitStrategy::TrainVal),
            "train_test_val" => Ok(SplitStrategy::TrainTestVal),
            other => Err(KolosalError::ConfigError(format!(
                "unknown split strategy '{}' (expected full, train_test, train_val or train_test_val)",
                other
            ))),
        }
    }
}

/// One split pass; identifies which view a results row was scored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSplit {
    Full,
    TrainTest,
    TrainVal,
}

impl DataSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSplit::Full => "full",
            DataSplit::TrainTest => "train_test",
            DataSplit::TrainVal => "train_val",
        }
    }
}

impl fmt::Display for DataSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split fractions and seed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSettings {
    /// Fraction of rows held out for testing
    pub test_size: f64,
    /// Fraction of the training portion held out for validation
    pub val_size: f64,
    pub seed: u64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            test_size: 0.33,
            val_size: 0.0,
            seed: 42,
        }
    }
}

/// Row indices for each view
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SplitIndices {
    pub train: Vec<u32>,
    pub test: Vec<u32>,
    pub val: Vec<u32>,
}

fn holdout_count(n: usize, fraction: f64) -> usize {
    if fraction <= 0.0 || n < 2 {
        return 0;
    }
    ((n as f64 * fraction).round() as usize).clamp(1, n - 1)
}

/// Compute shuffled, seeded split indices. Each view keeps source row order.
pub(crate) fn split_indices(
    n_rows: usize,
    split: DataSplit,
    settings: &SplitSettings,
) -> Result<SplitIndices> {
    for (name, value) in [("test_size", settings.test_size), ("val_size", settings.val_size)] {
        if !(0.0..1.0).contains(&value) {
            return Err(KolosalError::ValidationError(format!(
                "{} must be in [0, 1), got {}",
                name, value
            )));
        }
    }

    let all: Vec<u32> = (0..n_rows as u32).collect();
    if split == DataSplit::Full {
        return Ok(SplitIndices {
            train: all.clone(),
            test: all,
            val: Vec::new(),
        });
    }

    if split == DataSplit::TrainVal && settings.val_size <= 0.0 {
        return Err(KolosalError::ValidationError(
            "train_val split requires val_size > 0".to_string(),
        ));
    }

    let mut shuffled = all;
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    shuffled.shuffle(&mut rng);

    let n_test = holdout_count(n_rows, settings.test_size);
    let (test, rest) = shuffled.split_at(n_test);
    // validation rows only exist for the train_val pass
    let n_val = match split {
        DataSplit::TrainVal => holdout_count(rest.len(), settings.val_size),
        _ => 0,
    };
    let (val, train) = rest.split_at(n_val);

    if train.is_empty() {
        return Err(KolosalError::ValidationError(format!(
            "split of {} rows leaves no training rows",
            n_rows
        )));
    }

    let sorted = |part: &[u32]| {
        let mut v = part.to_vec();
        v.sort_unstable();
        v
    };

    Ok(SplitIndices {
        train: sorted(train),
        test: sorted(test),
        val: sorted(val),
    })
}
