//! A named pipeline step holding one technique

use super::params::{merge_layers, parameters_section};
use crate::algorithms::{Algorithm, Capability, Parameters, Predictions, RuntimeContext};
use crate::config::Settings;
use crate::dataset::{frame_to_array2, series_to_array, Dataset};
use crate::error::{KolosalError, Result};
use crate::registry::{TechniqueRegistry, NONE_TECHNIQUE};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One stage of a configuration.
///
/// Holds caller overrides until `finalize`, then the merged parameters and
/// the built algorithm. A `"none"` stage is finalized without touching the
/// registry and does nothing when applied.
#[derive(Debug)]
pub struct Stage {
    name: String,
    technique: String,
    parameters: Parameters,
    terminal: bool,
    algorithm: Option<Algorithm>,
    finalized: bool,
}

/// Serializable view of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub name: String,
    pub technique: String,
    pub parameters: Parameters,
    pub capability: Option<Capability>,
}

fn unsupported(stage: &str, technique: &str, capability: &str) -> KolosalError {
    KolosalError::UnsupportedOperation {
        stage: stage.to_string(),
        technique: technique.to_string(),
        capability: capability.to_string(),
    }
}

impl Stage {
    pub fn new(name: impl Into<String>, technique: impl Into<String>, terminal: bool) -> Self {
        Self {
            name: name.into(),
            technique: technique.into(),
            parameters: Parameters::new(),
            terminal,
            algorithm: None,
            finalized: false,
        }
    }

    /// Explicit caller overrides; highest precedence at finalize
    pub fn with_parameters(mut self, overrides: Parameters) -> Self {
        self.parameters = overrides;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn technique(&self) -> &str {
        &self.technique
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn is_none(&self) -> bool {
        self.technique == NONE_TECHNIQUE
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn capability(&self) -> Option<Capability> {
        self.algorithm.as_ref().map(Algorithm::capability)
    }

    /// Resolve the technique and merge parameters, lowest to highest:
    /// factory defaults, `<stage>_parameters`, `<technique>_parameters`,
    /// run-time values, caller overrides. Idempotent.
    pub fn finalize(
        &mut self,
        registry: &TechniqueRegistry,
        context: &RuntimeContext,
        settings: &Settings,
    ) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.is_none() {
            self.finalized = true;
            return Ok(());
        }

        let factory = registry.resolve(&self.name, &self.technique)?;
        let empty = Parameters::new();
        let defaults = factory.defaults();
        let stage_section = settings.section(&parameters_section(&self.name)).unwrap_or(&empty);
        let technique_section = settings
            .section(&parameters_section(&self.technique))
            .unwrap_or(&empty);
        let runtime = factory.runtime_parameters(context);

        let merged = merge_layers([
            &defaults,
            stage_section,
            technique_section,
            &runtime,
            &self.parameters,
        ]);
        let algorithm = factory.build(&merged)?;
        debug!(
            stage = %self.name,
            technique = %self.technique,
            capability = %algorithm.capability(),
            "Finalized stage"
        );

        self.parameters = merged;
        self.algorithm = Some(algorithm);
        self.finalized = true;
        Ok(())
    }

    /// Run the stage against the dataset
    pub fn apply(&mut self, dataset: &mut Dataset) -> Result<()> {
        if self.is_none() {
            return Ok(());
        }
        let algorithm = self.algorithm.as_mut().ok_or_else(|| {
            KolosalError::ValidationError(format!("stage '{}' applied before finalize", self.name))
        })?;
        debug!(stage = %self.name, technique = %self.technique, "Applying stage");

        match (self.terminal, algorithm) {
            (false, Algorithm::Transformer(transformer)) => {
                let (x, y) = dataset.training()?;
                transformer.fit(x, y, dataset.columns())?;
                dataset.map_features(|df| transformer.transform(df))
            }
            (false, Algorithm::Fitter(fitter)) => {
                let (x, y) = dataset.training()?;
                fitter.fit(x, y)
            }
            (false, Algorithm::Custom(applier)) => applier.apply(dataset),
            (false, Algorithm::Predictor(_)) => Err(unsupported(
                &self.name,
                &self.technique,
                "predictor outside the terminal stage",
            )),
            (true, Algorithm::Predictor(predictor)) => {
                let (x_train, y_train) = dataset.training()?;
                let x_train = frame_to_array2(x_train)?;
                let y_train = series_to_array(y_train)?;
                predictor.fit(&x_train, &y_train)?;

                let (x_eval, _) = dataset.evaluation()?;
                let x_eval = frame_to_array2(x_eval)?;
                let mut predictions = Predictions::new(predictor.predict(&x_eval)?);
                if let Some(proba) = predictor.predict_proba(&x_eval)? {
                    predictions = predictions.with_probabilities(proba);
                }
                dataset.set_predictions(predictions);
                Ok(())
            }
            (true, Algorithm::Custom(applier)) => {
                applier.apply(dataset)?;
                if dataset.predictions().is_none() {
                    return Err(unsupported(
                        &self.name,
                        &self.technique,
                        "custom applier left no predictions",
                    ));
                }
                Ok(())
            }
            (true, other) => Err(unsupported(
                &self.name,
                &self.technique,
                &format!("terminal stage needs a predictor, got {}", other.capability()),
            )),
        }
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.name.clone(),
            technique: self.technique.clone(),
            parameters: self.parameters.clone(),
            capability: self.capability(),
        }
    }
}
