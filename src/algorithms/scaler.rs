//! Feature scaling techniques

use super::{Algorithm, AlgorithmFactory, ParamReader, Parameters, Transformer};
use crate::dataset::ColumnMap;
use crate::error::{KolosalError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalerType {
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// Robust scaling using median and IQR
    Robust,
    /// Max absolute scaling: x / max(|x|)
    MaxAbs,
}

impl ScalerType {
    pub fn technique(&self) -> &'static str {
        match self {
            ScalerType::Standard => "standard",
            ScalerType::MinMax => "minmax",
            ScalerType::Robust => "robust",
            ScalerType::MaxAbs => "maxabs",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ScalerParams {
    center: f64, // mean, min, or median
    scale: f64,  // std, range, or IQR
}

/// Column-wise scaler fitted on the training view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    scaler_type: ScalerType,
    columns: Option<Vec<String>>,
    params: BTreeMap<String, ScalerParams>,
    is_fitted: bool,
}

impl Scaler {
    pub fn new(scaler_type: ScalerType) -> Self {
        Self {
            scaler_type,
            columns: None,
            params: BTreeMap::new(),
            is_fitted: false,
        }
    }

    /// Restrict scaling to these columns; defaults to every numeric column
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    fn compute_params(&self, series: &Series) -> Result<ScalerParams> {
        let cast = series.cast(&DataType::Float64)?;
        let ca = cast.f64()?;

        let (center, scale) = match self.scaler_type {
            ScalerType::Standard => (ca.mean().unwrap_or(0.0), ca.std(1).unwrap_or(1.0)),
            ScalerType::MinMax => {
                let min = ca.min().unwrap_or(0.0);
                let max = ca.max().unwrap_or(1.0);
                (min, max - min)
            }
            ScalerType::Robust => {
                let q1 = ca
                    .quantile(0.25, QuantileMethod::Linear)?
                    .unwrap_or(0.0);
                let q3 = ca
                    .quantile(0.75, QuantileMethod::Linear)?
                    .unwrap_or(1.0);
                (ca.median().unwrap_or(0.0), q3 - q1)
            }
            ScalerType::MaxAbs => {
                let max_abs = ca
                    .into_iter()
                    .filter_map(|v| v.map(f64::abs))
                    .fold(0.0f64, f64::max);
                (0.0, max_abs)
            }
        };

        Ok(ScalerParams {
            center,
            scale: if scale == 0.0 || !scale.is_finite() { 1.0 } else { scale },
        })
    }

    fn scale_series(series: &Series, params: &ScalerParams) -> Result<Series> {
        let cast = series.cast(&DataType::Float64)?;
        let scaled: Float64Chunked = cast
            .f64()?
            .into_iter()
            .map(|opt| opt.map(|v| (v - params.center) / params.scale))
            .collect();
        Ok(scaled.with_name(series.name().clone()).into_series())
    }
}

impl Transformer for Scaler {
    fn fit(&mut self, x: &DataFrame, _y: &Series, columns: &ColumnMap) -> Result<()> {
        let targets = self.columns.clone().unwrap_or_else(|| columns.numeric());

        self.params.clear();
        for col_name in &targets {
            let column = x
                .column(col_name)
                .map_err(|_| KolosalError::FeatureNotFound(col_name.clone()))?;
            let params = self.compute_params(column.as_materialized_series())?;
            self.params.insert(col_name.clone(), params);
        }

        self.is_fitted = true;
        Ok(())
    }

    /// Builds all replacement columns first, then applies them in one pass
    fn transform(&self, x: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(KolosalError::ModelNotFitted);
        }

        let replacements: Vec<Series> = self
            .params
            .iter()
            .map(|(col_name, params)| {
                let column = x
                    .column(col_name)
                    .map_err(|_| KolosalError::FeatureNotFound(col_name.clone()))?;
                Self::scale_series(column.as_materialized_series(), params)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut result = x.clone();
        for scaled in replacements {
            result.with_column(scaled)?;
        }
        Ok(result)
    }
}

/// Factory for one scaler type
#[derive(Debug, Clone, Copy)]
pub struct ScalerFactory {
    scaler_type: ScalerType,
}

impl ScalerFactory {
    pub fn new(scaler_type: ScalerType) -> Self {
        Self { scaler_type }
    }
}

impl AlgorithmFactory for ScalerFactory {
    fn name(&self) -> &str {
        self.scaler_type.technique()
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([("columns".to_string(), Value::Null)])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(self.name(), parameters, &["columns"])?;
        let mut scaler = Scaler::new(self.scaler_type);
        if let Some(columns) = reader.strings("columns")? {
            scaler = scaler.with_columns(columns);
        }
        Ok(Algorithm::Transformer(Box::new(scaler)))
    }
}

/// Symbols exported to the technique loader
pub fn symbols() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)> {
    vec![
        ("StandardScaler", Arc::new(ScalerFactory::new(ScalerType::Standard))),
        ("MinMaxScaler", Arc::new(ScalerFactory::new(ScalerType::MinMax))),
        ("RobustScaler", Arc::new(ScalerFactory::new(ScalerType::Robust))),
        ("MaxAbsScaler", Arc::new(ScalerFactory::new(ScalerType::MaxAbs))),
    ]
}
