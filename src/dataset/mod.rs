//! Dataset container
//!
//! Holds the source table, the feature/label views built from it, the
//! train/test/validation splits and the column type metadata. Every stage of a
//! configuration receives `&mut Dataset` and may mutate it in place; feature
//! mutations go through [`Dataset::map_features`], [`Dataset::set_training`]
//! or [`Dataset::drop_columns`] so that [`ColumnMap`] and the dropped-column
//! log change together with the tables.
//!
//! Cloning a dataset gives a fully isolated copy: polars columns are
//! immutable and every mutation here replaces a frame rather than writing
//! into shared buffers.

mod columns;
mod convert;
mod split;

pub use columns::{ColumnKind, ColumnMap};
pub use convert::{array2_to_frame, frame_to_array2, series_to_array};
pub use split::{DataSplit, SplitSettings, SplitStrategy};

use crate::algorithms::Predictions;
use crate::error::{KolosalError, Result};
use polars::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Shared, mutable tabular data for a grid run
#[derive(Debug, Clone)]
pub struct Dataset {
    df: DataFrame,
    label: String,
    source_columns: ColumnMap,
    x: Option<DataFrame>,
    y: Option<Series>,
    x_train: Option<DataFrame>,
    y_train: Option<Series>,
    x_test: Option<DataFrame>,
    y_test: Option<Series>,
    x_val: Option<DataFrame>,
    y_val: Option<Series>,
    evaluation: Option<DataSplit>,
    columns: ColumnMap,
    dropped_columns: Vec<String>,
    predictions: Option<Predictions>,
}

fn take_rows(df: &DataFrame, rows: &[u32]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec("idx".into(), rows.iter().map(|&r| r as IdxSize).collect());
    Ok(df.take(&idx)?)
}

fn take_series(s: &Series, rows: &[u32]) -> Result<Series> {
    let idx = IdxCa::from_vec("idx".into(), rows.iter().map(|&r| r as IdxSize).collect());
    Ok(s.take(&idx)?)
}

impl Dataset {
    /// Create a dataset from a table and the name of its label column
    pub fn new(df: DataFrame, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if df.column(&label).is_err() {
            return Err(KolosalError::FeatureNotFound(label));
        }

        let mut source_columns = ColumnMap::infer(&df);
        source_columns.remove(&label);

        let mut dataset = Self {
            df,
            label,
            source_columns,
            x: None,
            y: None,
            x_train: None,
            y_train: None,
            x_test: None,
            y_test: None,
            x_val: None,
            y_val: None,
            evaluation: None,
            columns: ColumnMap::new(),
            dropped_columns: Vec::new(),
            predictions: None,
        };
        dataset.reset_features()?;
        Ok(dataset)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The source table, label included
    pub fn source(&self) -> &DataFrame {
        &self.df
    }

    pub fn n_rows(&self) -> usize {
        self.df.height()
    }

    /// Rebuild `x`/`y` from the source table and discard any split views,
    /// predictions and per-configuration column changes.
    ///
    /// Fails with `DataError` if the label column has nulls.
    pub fn reset_features(&mut self) -> Result<()> {
        let x = self.df.drop(&self.label)?;
        let y = self
            .df
            .column(&self.label)?
            .as_materialized_series()
            .clone();
        if y.null_count() > 0 {
            return Err(KolosalError::DataError(format!(
                "label column '{}' has {} missing values",
                self.label,
                y.null_count()
            )));
        }

        let mut columns = self.source_columns.clone();
        let removed = columns.sync_with(&x);
        self.log_dropped(removed);

        self.x = Some(x);
        self.y = Some(y);
        self.x_train = None;
        self.y_train = None;
        self.x_test = None;
        self.y_test = None;
        self.x_val = None;
        self.y_val = None;
        self.evaluation = None;
        self.columns = columns;
        self.predictions = None;
        Ok(())
    }

    /// Build the split views for one split pass
    pub fn split(&mut self, split: DataSplit, settings: &SplitSettings) -> Result<()> {
        let x = self
            .x
            .as_ref()
            .ok_or_else(|| KolosalError::DataError("features not initialized".to_string()))?;
        let y = self
            .y
            .as_ref()
            .ok_or_else(|| KolosalError::DataError("labels not initialized".to_string()))?;

        let idx = split::split_indices(x.height(), split, settings)?;
        debug!(
            split = %split,
            train = idx.train.len(),
            test = idx.test.len(),
            val = idx.val.len(),
            "Splitting dataset"
        );

        let x_train = take_rows(x, &idx.train)?;
        let y_train = take_series(y, &idx.train)?;
        let (x_test, y_test) = if idx.test.is_empty() {
            (None, None)
        } else {
            (Some(take_rows(x, &idx.test)?), Some(take_series(y, &idx.test)?))
        };
        let (x_val, y_val) = if idx.val.is_empty() {
            (None, None)
        } else {
            (Some(take_rows(x, &idx.val)?), Some(take_series(y, &idx.val)?))
        };

        self.x_train = Some(x_train);
        self.y_train = Some(y_train);
        self.x_test = x_test;
        self.y_test = y_test;
        self.x_val = x_val;
        self.y_val = y_val;
        self.evaluation = Some(split);
        self.predictions = None;
        Ok(())
    }

    pub fn x(&self) -> Option<&DataFrame> {
        self.x.as_ref()
    }

    pub fn y(&self) -> Option<&Series> {
        self.y.as_ref()
    }

    pub fn x_train(&self) -> Option<&DataFrame> {
        self.x_train.as_ref()
    }

    pub fn y_train(&self) -> Option<&Series> {
        self.y_train.as_ref()
    }

    pub fn x_test(&self) -> Option<&DataFrame> {
        self.x_test.as_ref()
    }

    pub fn y_test(&self) -> Option<&Series> {
        self.y_test.as_ref()
    }

    pub fn x_val(&self) -> Option<&DataFrame> {
        self.x_val.as_ref()
    }

    pub fn y_val(&self) -> Option<&Series> {
        self.y_val.as_ref()
    }

    /// Split pass the current views were built for
    pub fn evaluation_split(&self) -> Option<DataSplit> {
        self.evaluation
    }

    /// Training features and labels
    pub fn training(&self) -> Result<(&DataFrame, &Series)> {
        match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(KolosalError::DataError("dataset has not been split".to_string())),
        }
    }

    /// Features and labels scored by the current split pass: the validation
    /// view for `train_val`, the test view otherwise.
    pub fn evaluation(&self) -> Result<(&DataFrame, &Series)> {
        let (x, y) = match self.evaluation {
            Some(DataSplit::TrainVal) => (&self.x_val, &self.y_val),
            Some(_) => (&self.x_test, &self.y_test),
            None => {
                return Err(KolosalError::DataError("dataset has not been split".to_string()))
            }
        };
        match (x, y) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(KolosalError::DataError(
                "evaluation view is empty; check test_size/val_size".to_string(),
            )),
        }
    }

    /// Current column metadata for the feature views
    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Cumulative log of dropped feature names, without duplicates
    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped_columns
    }

    pub fn predictions(&self) -> Option<&Predictions> {
        self.predictions.as_ref()
    }

    pub fn set_predictions(&mut self, predictions: Predictions) {
        self.predictions = Some(predictions);
    }

    pub fn take_predictions(&mut self) -> Option<Predictions> {
        self.predictions.take()
    }

    /// Apply a row-preserving transformation to every feature view, then
    /// reconcile the column metadata. Nothing is replaced if any view fails.
    pub fn map_features<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&DataFrame) -> Result<DataFrame>,
    {
        let mut apply = |view: &Option<DataFrame>| -> Result<Option<DataFrame>> {
            match view {
                Some(df) => {
                    let out = f(df)?;
                    if out.height() != df.height() {
                        return Err(KolosalError::ShapeError {
                            expected: format!("{} rows", df.height()),
                            actual: format!("{} rows", out.height()),
                        });
                    }
                    Ok(Some(out))
                }
                None => Ok(None),
            }
        };

        let x_train = apply(&self.x_train)?;
        let x_test = apply(&self.x_test)?;
        let x_val = apply(&self.x_val)?;
        let x = apply(&self.x)?;

        // columns whose dtype changed lose their recorded kind and are re-inferred
        if let (Some(before), Some(after)) = (
            self.x_train.as_ref().or(self.x.as_ref()),
            x_train.as_ref().or(x.as_ref()),
        ) {
            for column in after.get_columns() {
                let changed = before
                    .column(column.name())
                    .map(|old| old.dtype() != column.dtype())
                    .unwrap_or(false);
                if changed {
                    self.columns.remove(column.name());
                }
            }
        }

        self.x_train = x_train;
        self.x_test = x_test;
        self.x_val = x_val;
        self.x = x;
        self.sync_columns();
        Ok(())
    }

    /// Replace the training rows (resampling changes row counts)
    pub fn set_training(&mut self, x_train: DataFrame, y_train: Series) -> Result<()> {
        if x_train.height() != y_train.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} labels", x_train.height()),
                actual: format!("{} labels", y_train.len()),
            });
        }
        self.x_train = Some(x_train);
        self.y_train = Some(y_train);
        self.sync_columns();
        Ok(())
    }

    /// Drop feature columns from every view and record them
    pub fn drop_columns(&mut self, names: &[String]) -> Result<()> {
        for view in [&mut self.x, &mut self.x_train, &mut self.x_test, &mut self.x_val] {
            if let Some(df) = view.as_mut() {
                for name in names {
                    if df.column(name).is_ok() {
                        *df = df.drop(name)?;
                    }
                }
            }
        }
        self.sync_columns();
        Ok(())
    }

    fn sync_columns(&mut self) {
        let reference = self.x_train.as_ref().or(self.x.as_ref());
        if let Some(df) = reference {
            let removed = self.columns.sync_with(df);
            self.log_dropped(removed);
        }
    }

    fn log_dropped(&mut self, names: Vec<String>) {
        for name in names {
            if name != self.label && !self.dropped_columns.contains(&name) {
                self.dropped_columns.push(name);
            }
        }
    }

    // Source-table preparation. These act on the loaded table and its
    // curated metadata and take effect at the next `reset_features`.

    /// Curated column metadata of the source table
    pub fn source_columns(&self) -> &ColumnMap {
        &self.source_columns
    }

    /// Override the kind recorded for source columns
    pub fn change_column_kind(&mut self, names: &[String], kind: ColumnKind) -> Result<()> {
        for name in names {
            if !self.source_columns.contains(name) {
                return Err(KolosalError::FeatureNotFound(name.clone()));
            }
            self.source_columns.insert(name.clone(), kind);
        }
        self.reset_features()
    }

    /// Mark non-boolean columns with fewer than `threshold` distinct values
    /// as categorical. Returns the converted names.
    pub fn auto_categorize(&mut self, threshold: usize) -> Result<Vec<String>> {
        let mut converted = Vec::new();
        for (name, kind) in self.source_columns.clone().iter() {
            if matches!(kind, ColumnKind::Boolean | ColumnKind::Categorical) {
                continue;
            }
            let n_unique = self.df.column(name)?.as_materialized_series().n_unique()?;
            if n_unique < threshold {
                self.source_columns.insert(name, ColumnKind::Categorical);
                converted.push(name.to_string());
            }
        }
        self.reset_features()?;
        Ok(converted)
    }

    /// Fill nulls with the default value of each column's kind.
    /// List and temporal columns are left untouched.
    pub fn smart_fill_nulls(&mut self) -> Result<()> {
        for (name, kind) in self.source_columns.clone().iter() {
            let series = self.df.column(name)?.as_materialized_series().clone();
            if series.null_count() == 0 {
                continue;
            }
            let filled = match kind {
                ColumnKind::Boolean => series
                    .cast(&DataType::Boolean)?
                    .bool()?
                    .into_iter()
                    .map(|v| Some(v.unwrap_or(false)))
                    .collect::<BooleanChunked>()
                    .into_series(),
                ColumnKind::Float => series
                    .cast(&DataType::Float64)?
                    .f64()?
                    .into_iter()
                    .map(|v| Some(v.unwrap_or(0.0)))
                    .collect::<Float64Chunked>()
                    .into_series(),
                ColumnKind::Integer => series
                    .cast(&DataType::Int64)?
                    .i64()?
                    .into_iter()
                    .map(|v| Some(v.unwrap_or(0)))
                    .collect::<Int64Chunked>()
                    .into_series(),
                ColumnKind::String | ColumnKind::Categorical => series
                    .cast(&DataType::String)?
                    .str()?
                    .into_iter()
                    .map(|v| Some(v.unwrap_or("")))
                    .collect::<StringChunked>()
                    .into_series(),
                ColumnKind::List | ColumnKind::DateTime | ColumnKind::TimeDelta => continue,
            };
            self.df.with_column(filled.with_name(name.into()))?;
        }
        self.reset_features()
    }

    /// Shrink numeric columns to the narrowest dtype that holds their range
    pub fn downcast(&mut self) -> Result<()> {
        for (name, kind) in self.source_columns.clone().iter() {
            let series = self.df.column(name)?.as_materialized_series().clone();
            let target = match kind {
                ColumnKind::Boolean => Some(DataType::Boolean),
                ColumnKind::Float => Some(DataType::Float32),
                ColumnKind::Integer => {
                    let ints = series.cast(&DataType::Int64)?;
                    let ca = ints.i64()?;
                    match (ca.min(), ca.max()) {
                        (Some(min), Some(max)) => Some(narrowest_integer(min, max)),
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(dtype) = target {
                if series.dtype() != &dtype {
                    let cast = series.cast(&dtype)?;
                    self.df.with_column(cast)?;
                }
            }
        }
        self.reset_features()
    }

    /// Replace categories whose relative frequency is at or below
    /// `threshold` with the empty default category
    pub fn convert_rare(&mut self, names: &[String], threshold: f64) -> Result<()> {
        for name in names {
            let series = self
                .df
                .column(name)
                .map_err(|_| KolosalError::FeatureNotFound(name.clone()))?
                .as_materialized_series()
                .cast(&DataType::String)?;
            let ca = series.str()?;
            let n = ca.len().max(1) as f64;

            let mut counts: HashMap<&str, usize> = HashMap::new();
            for value in ca.into_iter().flatten() {
                *counts.entry(value).or_insert(0) += 1;
            }

            let converted: StringChunked = ca
                .into_iter()
                .map(|v| {
                    v.map(|value| {
                        let freq = counts.get(value).copied().unwrap_or(0) as f64 / n;
                        if freq <= threshold {
                            ""
                        } else {
                            value
                        }
                    })
                })
                .collect();
            self.df
                .with_column(converted.into_series().with_name(name.as_str().into()))?;
        }
        self.reset_features()
    }

    /// Drop boolean columns whose share of `true` is below `threshold`.
    /// Returns the dropped names.
    pub fn drop_infrequent(&mut self, names: &[String], threshold: f64) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        for name in names {
            let series = self
                .df
                .column(name)
                .map_err(|_| KolosalError::FeatureNotFound(name.clone()))?
                .as_materialized_series()
                .cast(&DataType::Float64)?;
            let rate = series.f64()?.mean().unwrap_or(0.0);
            if rate < threshold {
                dropped.push(name.clone());
            }
        }
        self.drop_source_columns(&dropped)?;
        Ok(dropped)
    }

    /// Remove columns from the source table and log them as dropped
    pub fn drop_source_columns(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            if name == &self.label {
                return Err(KolosalError::ValidationError(format!(
                    "cannot drop label column '{}'",
                    name
                )));
            }
            if self.df.column(name).is_ok() {
                self.df = self.df.drop(name)?;
            }
            self.source_columns.remove(name);
        }
        self.log_dropped(names.to_vec());
        self.reset_features()
    }

    /// `n / positives - 1` over the full label column, the usual
    /// `scale_pos_weight` for boosted models. `None` without positives or for a
    /// non-numeric label.
    pub fn class_imbalance_ratio(&self) -> Option<f64> {
        let y = self.df.column(&self.label).ok()?.as_materialized_series();
        let values = series_to_array(y).ok()?;
        let positives = values.iter().filter(|&&v| v == 1.0).count();
        if positives == 0 {
            return None;
        }
        Some(values.len() as f64 / positives as f64 - 1.0)
    }
}

fn narrowest_integer(min: i64, max: i64) -> DataType {
    if min >= 0 {
        if max <= u8::MAX as i64 {
            DataType::UInt8
        } else if max <= u16::MAX as i64 {
            DataType::UInt16
        } else if max <= u32::MAX as i64 {
            DataType::UInt32
        } else {
            DataType::UInt64
        }
    } else if min >= i8::MIN as i64 && max <= i8::MAX as i64 {
        DataType::Int8
    } else if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
        DataType::Int16
    } else if min >= i32::MIN as i64 && max <= i32::MAX as i64 {
        DataType::Int32
    } else {
        DataType::Int64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let df = df!(
            "f1" => &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            "f2" => &[10i64, 20, 30, 40, 50, 60, 70, 80],
            "color" => &["red", "red", "blue", "red", "green", "red", "blue", "red"],
            "label" => &[0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]
        )
        .unwrap();
        Dataset::new(df, "label").unwrap()
    }

    #[test]
    fn test_new_excludes_label_from_columns() {
        let ds = sample();
        assert_eq!(ds.columns().len(), 3);
        assert!(!ds.columns().contains("label"));
        assert_eq!(ds.x().unwrap().width(), 3);
        assert_eq!(ds.y().unwrap().len(), 8);
    }

    #[test]
    fn test_missing_label_rejected() {
        let df = df!("f1" => &[1.0]).unwrap();
        assert!(matches!(
            Dataset::new(df, "target"),
            Err(KolosalError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn test_null_label_rejected() {
        let df = df!(
            "f1" => &[1.0, 2.0, 3.0],
            "target" => &[Some(1.0), None, Some(0.0)]
        )
        .unwrap();
        let err = Dataset::new(df, "target").unwrap_err();
        assert_eq!(err.kind(), "data");
    }

    #[test]
    fn test_split_and_evaluation_view() {
        let mut ds = sample();
        let settings = SplitSettings {
            test_size: 0.25,
            val_size: 0.0,
            seed: 1,
        };
        ds.split(DataSplit::TrainTest, &settings).unwrap();
        let (x_train, y_train) = ds.training().unwrap();
        assert_eq!(x_train.height(), 6);
        assert_eq!(y_train.len(), 6);
        let (x_eval, _) = ds.evaluation().unwrap();
        assert_eq!(x_eval.height(), 2);
    }

    #[test]
    fn test_drop_columns_updates_metadata() {
        let mut ds = sample();
        ds.split(DataSplit::Full, &SplitSettings::default()).unwrap();
        ds.drop_columns(&["f2".to_string()]).unwrap();

        assert!(!ds.columns().contains("f2"));
        assert_eq!(ds.x_train().unwrap().width(), 2);
        assert_eq!(ds.dropped_columns(), &["f2".to_string()]);

        // a reset restores the feature but keeps the log
        ds.reset_features().unwrap();
        assert!(ds.columns().contains("f2"));
        assert_eq!(ds.dropped_columns().len(), 1);
    }

    #[test]
    fn test_class_imbalance_ratio() {
        let ds = sample();
        let ratio = ds.class_imbalance_ratio().unwrap();
        assert!((ratio - (8.0 / 3.0 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_auto_categorize_and_convert_rare() {
        let mut ds = sample();
        let converted = ds.auto_categorize(4).unwrap();
        assert_eq!(converted, vec!["color".to_string()]);
        assert_eq!(ds.columns().get("color"), Some(ColumnKind::Categorical));

        ds.convert_rare(&["color".to_string()], 0.125).unwrap();
        let color = ds.source().column("color").unwrap().as_materialized_series().clone();
        let values: Vec<Option<&str>> = color.str().unwrap().into_iter().collect();
        assert_eq!(values[4], Some(""));
        assert_eq!(values[0], Some("red"));
    }

    #[test]
    fn test_downcast_integers() {
        let mut ds = sample();
        ds.downcast().unwrap();
        assert_eq!(ds.source().column("f2").unwrap().dtype(), &DataType::UInt8);
        assert_eq!(ds.source().column("f1").unwrap().dtype(), &DataType::Float32);
    }
}
