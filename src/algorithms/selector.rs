//! Feature selection techniques
//!
//! Selectors score numeric columns on the training view and drop the losers
//! from every feature view. Non-numeric columns pass through.

use super::{Algorithm, AlgorithmFactory, ParamReader, Parameters, Transformer};
use crate::dataset::{series_to_array, ColumnMap};
use crate::error::{KolosalError, Result};
use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Feature selection method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SelectionMethod {
    /// Remove features with variance at or below threshold
    VarianceThreshold { threshold: f64 },
    /// Keep the k features most correlated (absolute Pearson) with the label
    KBestCorrelation { k: usize },
}

fn variance(values: ArrayView1<f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mean = values.sum() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

fn abs_correlation(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let n = x.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_x = x.sum() / n;
    let mean_y = y.sum() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        (cov / denom).abs()
    }
}

/// Feature selector fitted on the training view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    method: SelectionMethod,
    feature_scores: Vec<(String, f64)>,
    removed: Option<Vec<String>>,
}

impl FeatureSelector {
    pub fn new(method: SelectionMethod) -> Self {
        Self {
            method,
            feature_scores: Vec::new(),
            removed: None,
        }
    }

    pub fn variance_threshold(threshold: f64) -> Self {
        Self::new(SelectionMethod::VarianceThreshold { threshold })
    }

    pub fn kbest_correlation(k: usize) -> Self {
        Self::new(SelectionMethod::KBestCorrelation { k })
    }

    /// Score per numeric feature from the last fit
    pub fn feature_scores(&self) -> &[(String, f64)] {
        &self.feature_scores
    }

    /// Columns dropped by `transform`
    pub fn removed_features(&self) -> Option<&[String]> {
        self.removed.as_deref()
    }
}

impl Transformer for FeatureSelector {
    fn fit(&mut self, x: &DataFrame, y: &Series, columns: &ColumnMap) -> Result<()> {
        let y = series_to_array(y)?;
        let numeric = columns.numeric();

        let mut scores = Vec::with_capacity(numeric.len());
        for name in &numeric {
            let column = x
                .column(name)
                .map_err(|_| KolosalError::FeatureNotFound(name.clone()))?;
            let values: Array1<f64> = series_to_array(column.as_materialized_series())?;
            let score = match self.method {
                SelectionMethod::VarianceThreshold { .. } => variance(values.view()),
                SelectionMethod::KBestCorrelation { .. } => abs_correlation(values.view(), y.view()),
            };
            scores.push((name.clone(), score));
        }

        let removed: Vec<String> = match self.method {
            SelectionMethod::VarianceThreshold { threshold } => scores
                .iter()
                .filter(|(_, s)| *s <= threshold)
                .map(|(n, _)| n.clone())
                .collect(),
            SelectionMethod::KBestCorrelation { k } => {
                let mut ranked = scores.clone();
                ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                ranked.into_iter().skip(k).map(|(n, _)| n).collect()
            }
        };

        self.feature_scores = scores;
        self.removed = Some(removed);
        Ok(())
    }

    fn transform(&self, x: &DataFrame) -> Result<DataFrame> {
        let removed = self.removed.as_ref().ok_or(KolosalError::ModelNotFitted)?;
        let mut result = x.clone();
        for name in removed {
            if result.column(name).is_ok() {
                result = result.drop(name)?;
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VarianceThresholdFactory;

impl AlgorithmFactory for VarianceThresholdFactory {
    fn name(&self) -> &str {
        "variance_threshold"
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([("threshold".to_string(), Value::from(0.0))])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(self.name(), parameters, &["threshold"])?;
        let threshold = reader.f64("threshold", 0.0)?;
        if threshold < 0.0 {
            return Err(KolosalError::invalid_parameter("threshold", threshold, "must be >= 0"));
        }
        Ok(Algorithm::Transformer(Box::new(FeatureSelector::variance_threshold(threshold))))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KBestCorrelationFactory;

impl AlgorithmFactory for KBestCorrelationFactory {
    fn name(&self) -> &str {
        "kbest_correlation"
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([("k".to_string(), Value::from(10u64))])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(self.name(), parameters, &["k"])?;
        let k = reader.usize("k", 10)?;
        if k == 0 {
            return Err(KolosalError::invalid_parameter("k", k, "must be positive"));
        }
        Ok(Algorithm::Transformer(Box::new(FeatureSelector::kbest_correlation(k))))
    }
}

/// Symbols exported to the technique loader
pub fn symbols() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)> {
    vec![
        ("VarianceThreshold", Arc::new(VarianceThresholdFactory)),
        ("SelectKBestCorrelation", Arc::new(KBestCorrelationFactory)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> (DataFrame, Series) {
        let x = df!(
            "signal" => &[1.0, 2.0, 3.0, 4.0, 5.0],
            "noise" => &[0.3, -0.1, 0.4, 0.0, 0.2],
            "constant" => &[7.0, 7.0, 7.0, 7.0, 7.0],
            "tag" => &["a", "b", "a", "b", "a"]
        )
        .unwrap();
        let y = Series::new("y".into(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        (x, y)
    }

    #[test]
    fn test_variance_threshold_drops_constant() {
        let (x, y) = data();
        let mut selector = FeatureSelector::variance_threshold(0.0);
        selector.fit(&x, &y, &ColumnMap::infer(&x)).unwrap();
        let out = selector.transform(&x).unwrap();

        assert!(out.column("constant").is_err());
        assert!(out.column("tag").is_ok());
        assert_eq!(out.width(), 3);
    }

    #[test]
    fn test_kbest_keeps_most_correlated() {
        let (x, y) = data();
        let mut selector = FeatureSelector::kbest_correlation(1);
        selector.fit(&x, &y, &ColumnMap::infer(&x)).unwrap();
        let out = selector.transform(&x).unwrap();

        assert!(out.column("signal").is_ok());
        assert!(out.column("noise").is_err());
        assert_eq!(selector.removed_features().unwrap().len(), 2);
    }
}
