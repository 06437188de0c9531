//! Algorithm capabilities and factories
//!
//! A technique resolves to an [`AlgorithmFactory`]. Finalizing a stage merges
//! the factory's parameters and calls [`AlgorithmFactory::build`], which
//! returns an [`Algorithm`] declaring up front which capability it provides.
//! Stages dispatch on that variant instead of probing for methods at call
//! time.
//!
//! The modules below hold the built-in techniques registered by the default
//! catalog.

pub mod encoder;
pub mod knn;
pub mod linear_models;
mod params;
pub mod sampler;
pub mod scaler;
pub mod selector;

pub use params::{ParamReader, Parameters};

use crate::dataset::{ColumnMap, Dataset};
use crate::error::Result;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fit on the training view, then transform every feature view
pub trait Transformer: Send + fmt::Debug {
    fn fit(&mut self, x: &DataFrame, y: &Series, columns: &ColumnMap) -> Result<()>;
    fn transform(&self, x: &DataFrame) -> Result<DataFrame>;
}

/// Supervised model used by the terminal stage
pub trait Predictor: Send + fmt::Debug {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Positive-class probabilities, when the model produces them
    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Option<Array1<f64>>> {
        Ok(None)
    }
}

/// Fit-only step; leaves the data untouched
pub trait Fitter: Send + fmt::Debug {
    fn fit(&mut self, x: &DataFrame, y: &Series) -> Result<()>;
}

/// Step that works on the whole dataset container
pub trait CustomApplier: Send + fmt::Debug {
    fn apply(&mut self, dataset: &mut Dataset) -> Result<()>;
}

/// A built algorithm tagged with its capability
#[derive(Debug)]
pub enum Algorithm {
    Transformer(Box<dyn Transformer>),
    Predictor(Box<dyn Predictor>),
    Fitter(Box<dyn Fitter>),
    Custom(Box<dyn CustomApplier>),
}

impl Algorithm {
    pub fn capability(&self) -> Capability {
        match self {
            Algorithm::Transformer(_) => Capability::Transformer,
            Algorithm::Predictor(_) => Capability::Predictor,
            Algorithm::Fitter(_) => Capability::Fitter,
            Algorithm::Custom(_) => Capability::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Transformer,
    Predictor,
    Fitter,
    Custom,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Transformer => "transformer",
            Capability::Predictor => "predictor",
            Capability::Fitter => "fitter",
            Capability::Custom => "custom",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the terminal stage
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub labels: Array1<f64>,
    pub probabilities: Option<Array1<f64>>,
}

impl Predictions {
    pub fn new(labels: Array1<f64>) -> Self {
        Self {
            labels,
            probabilities: None,
        }
    }

    pub fn with_probabilities(mut self, probabilities: Array1<f64>) -> Self {
        self.probabilities = Some(probabilities);
        self
    }
}

/// Run-time values available when parameters are finalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeContext {
    pub seed: u64,
    pub n_rows: usize,
    pub n_features: usize,
    /// `n / positives - 1` on the label column
    pub class_imbalance_ratio: Option<f64>,
}

impl RuntimeContext {
    pub fn from_dataset(dataset: &Dataset, seed: u64) -> Self {
        Self {
            seed,
            n_rows: dataset.n_rows(),
            n_features: dataset.columns().len(),
            class_imbalance_ratio: dataset.class_imbalance_ratio(),
        }
    }
}

/// Builds algorithms for one technique
pub trait AlgorithmFactory: Send + Sync + fmt::Debug {
    /// Technique name
    fn name(&self) -> &str;

    /// Hard-coded defaults; also the set of accepted parameter names
    fn defaults(&self) -> Parameters {
        Parameters::new()
    }

    /// Values computed from the run, such as `random_state`
    fn runtime_parameters(&self, _context: &RuntimeContext) -> Parameters {
        Parameters::new()
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm>;
}

type BuildFn = dyn Fn(&Parameters) -> Result<Algorithm> + Send + Sync;

/// Factory backed by a closure
#[derive(Clone)]
pub struct FnFactory {
    name: String,
    defaults: Parameters,
    build: Arc<BuildFn>,
}

impl FnFactory {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Parameters) -> Result<Algorithm> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            defaults: Parameters::new(),
            build: Arc::new(build),
        }
    }

    pub fn with_defaults(mut self, defaults: Parameters) -> Self {
        self.defaults = defaults;
        self
    }
}

impl fmt::Debug for FnFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl AlgorithmFactory for FnFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self) -> Parameters {
        self.defaults.clone()
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        (self.build)(parameters)
    }
}
