//! Categorical encoding techniques
//!
//! Categories are learned from the training view only; values unseen at fit
//! time map to a fixed fallback (`-1` ordinal, all-zero one-hot, `0`
//! frequency).

use super::{Algorithm, AlgorithmFactory, ParamReader, Parameters, Transformer};
use crate::dataset::ColumnMap;
use crate::error::{KolosalError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Encoding method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderType {
    /// Category -> index in sorted category order
    Ordinal,
    /// One indicator column per category; the source column is removed
    OneHot,
    /// Category -> relative frequency in the training view
    Frequency,
}

impl EncoderType {
    pub fn technique(&self) -> &'static str {
        match self {
            EncoderType::Ordinal => "ordinal",
            EncoderType::OneHot => "onehot",
            EncoderType::Frequency => "frequency",
        }
    }
}

/// Categories of one column and their training frequencies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CategoryStats {
    counts: BTreeMap<String, usize>,
    total: usize,
}

impl CategoryStats {
    fn index_of(&self, value: &str) -> Option<usize> {
        self.counts.keys().position(|k| k == value)
    }

    fn frequency(&self, value: &str) -> f64 {
        match self.counts.get(value) {
            Some(&count) if self.total > 0 => count as f64 / self.total as f64,
            _ => 0.0,
        }
    }
}

fn as_strings(series: &Series) -> Result<Series> {
    Ok(series.cast(&DataType::String)?)
}

/// Categorical encoder fitted on the training view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    encoder_type: EncoderType,
    columns: Option<Vec<String>>,
    stats: BTreeMap<String, CategoryStats>,
    is_fitted: bool,
}

impl Encoder {
    pub fn new(encoder_type: EncoderType) -> Self {
        Self {
            encoder_type,
            columns: None,
            stats: BTreeMap::new(),
            is_fitted: false,
        }
    }

    /// Restrict encoding to these columns; defaults to every categorical column
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    fn encode_column(&self, name: &str, series: &Series, stats: &CategoryStats) -> Result<Vec<Series>> {
        let strings = as_strings(series)?;
        let ca = strings.str()?;

        match self.encoder_type {
            EncoderType::Ordinal => {
                let encoded: Float64Chunked = ca
                    .into_iter()
                    .map(|v| {
                        Some(
                            v.and_then(|s| stats.index_of(s))
                                .map(|i| i as f64)
                                .unwrap_or(-1.0),
                        )
                    })
                    .collect();
                Ok(vec![encoded.with_name(name.into()).into_series()])
            }
            EncoderType::Frequency => {
                let encoded: Float64Chunked = ca
                    .into_iter()
                    .map(|v| Some(v.map(|s| stats.frequency(s)).unwrap_or(0.0)))
                    .collect();
                Ok(vec![encoded.with_name(name.into()).into_series()])
            }
            EncoderType::OneHot => Ok(stats
                .counts
                .keys()
                .map(|category| {
                    let indicator: Float64Chunked = ca
                        .into_iter()
                        .map(|v| Some(if v == Some(category.as_str()) { 1.0 } else { 0.0 }))
                        .collect();
                    let column_name = format!("{}_{}", name, category);
                    indicator.with_name(column_name.as_str().into()).into_series()
                })
                .collect()),
        }
    }
}

impl Transformer for Encoder {
    fn fit(&mut self, x: &DataFrame, _y: &Series, columns: &ColumnMap) -> Result<()> {
        let targets = self.columns.clone().unwrap_or_else(|| columns.categorical());

        self.stats.clear();
        for col_name in &targets {
            let column = x
                .column(col_name)
                .map_err(|_| KolosalError::FeatureNotFound(col_name.clone()))?;
            let strings = as_strings(column.as_materialized_series())?;

            let mut stats = CategoryStats::default();
            for value in strings.str()?.into_iter().flatten() {
                *stats.counts.entry(value.to_string()).or_insert(0) += 1;
                stats.total += 1;
            }
            self.stats.insert(col_name.clone(), stats);
        }

        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, x: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(KolosalError::ModelNotFitted);
        }

        let mut result = x.clone();
        for (col_name, stats) in &self.stats {
            let column = x
                .column(col_name)
                .map_err(|_| KolosalError::FeatureNotFound(col_name.clone()))?;
            let encoded = self.encode_column(col_name, column.as_materialized_series(), stats)?;

            if self.encoder_type == EncoderType::OneHot {
                result = result.drop(col_name)?;
            }
            for series in encoded {
                result.with_column(series)?;
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderFactory {
    encoder_type: EncoderType,
}

impl EncoderFactory {
    pub fn new(encoder_type: EncoderType) -> Self {
        Self { encoder_type }
    }
}

impl AlgorithmFactory for EncoderFactory {
    fn name(&self) -> &str {
        self.encoder_type.technique()
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([("columns".to_string(), Value::Null)])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(self.name(), parameters, &["columns"])?;
        let mut encoder = Encoder::new(self.encoder_type);
        if let Some(columns) = reader.strings("columns")? {
            encoder = encoder.with_columns(columns);
        }
        Ok(Algorithm::Transformer(Box::new(encoder)))
    }
}

/// Symbols exported to the technique loader
pub fn symbols() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)> {
    vec![
        ("OrdinalEncoder", Arc::new(EncoderFactory::new(EncoderType::Ordinal))),
        ("OneHotEncoder", Arc::new(EncoderFactory::new(EncoderType::OneHot))),
        ("FrequencyEncoder", Arc::new(EncoderFactory::new(EncoderType::Frequency))),
    ]
}
