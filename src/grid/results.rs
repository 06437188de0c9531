//! Results table and best-configuration tracking

use crate::algorithms::Parameters;
use crate::dataset::DataSplit;
use crate::error::{KolosalError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one configuration on one split pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Succeeded,
    Failed { kind: String, message: String },
}

/// One row of the results table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsRow {
    pub configuration_number: usize,
    pub data_split: DataSplit,
    /// `(stage, technique)` in stage order
    pub stage_techniques: Vec<(String, String)>,
    /// Finalized parameters per stage; empty for stages never finalized
    pub parameters: BTreeMap<String, Parameters>,
    pub metrics: BTreeMap<String, Option<f64>>,
    pub status: RowStatus,
    pub elapsed_secs: f64,
}

impl ResultsRow {
    /// A failed row: every metric is null
    pub fn failed(
        configuration_number: usize,
        data_split: DataSplit,
        stage_techniques: Vec<(String, String)>,
        metric_names: &[String],
        error: &KolosalError,
    ) -> Self {
        Self {
            configuration_number,
            data_split,
            stage_techniques,
            parameters: BTreeMap::new(),
            metrics: metric_names.iter().map(|m| (m.clone(), None)).collect(),
            status: RowStatus::Failed {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
            elapsed_secs: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, RowStatus::Succeeded)
    }

    /// Metric value, `None` when missing, null or the row failed
    pub fn score(&self, metric: &str) -> Option<f64> {
        if !self.is_success() {
            return None;
        }
        self.metrics.get(metric).copied().flatten()
    }

    pub fn technique(&self, stage: &str) -> Option<&str> {
        self.stage_techniques
            .iter()
            .find(|(s, _)| s == stage)
            .map(|(_, t)| t.as_str())
    }

    fn sort_key(&self) -> (usize, DataSplit) {
        (self.configuration_number, self.data_split)
    }
}

/// Append-only table of results rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsTable {
    stage_order: Vec<String>,
    metric_names: Vec<String>,
    rows: Vec<ResultsRow>,
}

impl ResultsTable {
    pub fn new(stage_order: Vec<String>, metric_names: Vec<String>) -> Self {
        Self {
            stage_order,
            metric_names,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: ResultsRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[ResultsRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stage_order(&self) -> &[String] {
        &self.stage_order
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    pub fn get(&self, configuration_number: usize, split: DataSplit) -> Option<&ResultsRow> {
        self.rows
            .iter()
            .find(|r| r.configuration_number == configuration_number && r.data_split == split)
    }

    pub fn successful(&self) -> impl Iterator<Item = &ResultsRow> {
        self.rows.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResultsRow> {
        self.rows.iter().filter(|r| !r.is_success())
    }

    /// Order rows by `(configuration_number, split)`
    pub fn sort(&mut self) {
        self.rows.sort_by_key(ResultsRow::sort_key);
    }

    /// Flatten into a frame: one column per stage and per metric
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = Vec::new();

        let numbers: Vec<u64> = self
            .rows
            .iter()
            .map(|r| r.configuration_number as u64)
            .collect();
        columns.push(Series::new("configuration".into(), numbers).into());

        let splits: Vec<&str> = self.rows.iter().map(|r| r.data_split.as_str()).collect();
        columns.push(Series::new("data_split".into(), splits).into());

        for stage in &self.stage_order {
            let techniques: Vec<Option<&str>> =
                self.rows.iter().map(|r| r.technique(stage)).collect();
            columns.push(Series::new(stage.as_str().into(), techniques).into());
        }

        for metric in &self.metric_names {
            let values: Vec<Option<f64>> = self
                .rows
                .iter()
                .map(|r| r.metrics.get(metric).copied().flatten())
                .collect();
            columns.push(Series::new(metric.as_str().into(), values).into());
        }

        let (status, kind, message): (Vec<&str>, Vec<Option<&str>>, Vec<Option<&str>>) = self
            .rows
            .iter()
            .map(|r| match &r.status {
                RowStatus::Succeeded => ("succeeded", None, None),
                RowStatus::Failed { kind, message } => {
                    ("failed", Some(kind.as_str()), Some(message.as_str()))
                }
            })
            .fold((Vec::new(), Vec::new(), Vec::new()), |mut acc, (s, k, m)| {
                acc.0.push(s);
                acc.1.push(k);
                acc.2.push(m);
                acc
            });
        columns.push(Series::new("status".into(), status).into());
        columns.push(Series::new("error_kind".into(), kind).into());
        columns.push(Series::new("error_message".into(), message).into());

        let elapsed: Vec<f64> = self.rows.iter().map(|r| r.elapsed_secs).collect();
        columns.push(Series::new("elapsed_secs".into(), elapsed).into());

        let parameters = self
            .rows
            .iter()
            .map(|r| serde_json::to_string(&r.parameters))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        columns.push(Series::new("parameters".into(), parameters).into());

        Ok(DataFrame::new(columns)?)
    }
}

/// Best row seen so far on the primary metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEntry {
    pub configuration_number: usize,
    pub data_split: DataSplit,
    pub score: f64,
}

/// Tracks the best successful row; replaced only on strict improvement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestTracker {
    metric: String,
    best: Option<BestEntry>,
}

impl BestTracker {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            best: None,
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Offer a row; returns `true` if it became the new best. Failed rows
    /// and rows without a finite primary score are ignored.
    pub fn observe(&mut self, row: &ResultsRow) -> bool {
        let score = match row.score(&self.metric) {
            Some(s) if s.is_finite() => s,
            _ => return false,
        };
        let improved = match &self.best {
            Some(best) => score > best.score,
            None => true,
        };
        if improved {
            self.best = Some(BestEntry {
                configuration_number: row.configuration_number,
                data_split: row.data_split,
                score,
            });
        }
        improved
    }

    pub fn best(&self) -> Option<&BestEntry> {
        self.best.as_ref()
    }

    pub fn best_configuration_number(&self) -> Option<usize> {
        self.best.as_ref().map(|b| b.configuration_number)
    }

    pub fn best_split(&self) -> Option<DataSplit> {
        self.best.as_ref().map(|b| b.data_split)
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: usize, split: DataSplit, accuracy: Option<f64>) -> ResultsRow {
        ResultsRow {
            configuration_number: number,
            data_split: split,
            stage_techniques: vec![("model".to_string(), "logit".to_string())],
            parameters: BTreeMap::new(),
            metrics: [("accuracy".to_string(), accuracy)].into_iter().collect(),
            status: RowStatus::Succeeded,
            elapsed_secs: 0.01,
        }
    }

    #[test]
    fn test_best_tracker_strict_improvement() {
        let mut tracker = BestTracker::new("accuracy");
        assert!(tracker.observe(&row(1, DataSplit::TrainTest, Some(0.8))));
        assert!(!tracker.observe(&row(2, DataSplit::TrainTest, Some(0.8))));
        assert!(tracker.observe(&row(3, DataSplit::TrainTest, Some(0.9))));
        assert!(!tracker.observe(&row(4, DataSplit::TrainTest, None)));
        assert_eq!(tracker.best_configuration_number(), Some(3));
        assert_eq!(tracker.best_score(), Some(0.9));
    }

    #[test]
    fn test_best_tracker_ignores_failed_rows() {
        let mut tracker = BestTracker::new("accuracy");
        let err = KolosalError::UnknownTechnique {
            stage: "model".to_string(),
            technique: "forest".to_string(),
        };
        let failed = ResultsRow::failed(
            1,
            DataSplit::TrainTest,
            vec![("model".to_string(), "forest".to_string())],
            &["accuracy".to_string()],
            &err,
        );
        assert!(!tracker.observe(&failed));
        assert!(tracker.best().is_none());
        assert_eq!(failed.metrics["accuracy"], None);
    }

    #[test]
    fn test_sort_and_frame() {
        let mut table = ResultsTable::new(vec!["model".to_string()], vec!["accuracy".to_string()]);
        table.push(row(2, DataSplit::TrainTest, Some(0.7)));
        table.push(row(1, DataSplit::TrainVal, Some(0.6)));
        table.push(row(1, DataSplit::TrainTest, None));
        table.sort();

        let order: Vec<(usize, DataSplit)> = table
            .rows()
            .iter()
            .map(|r| (r.configuration_number, r.data_split))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, DataSplit::TrainTest),
                (1, DataSplit::TrainVal),
                (2, DataSplit::TrainTest)
            ]
        );

        let df = table.to_dataframe().unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.column("accuracy").unwrap().null_count(), 1);
        assert!(df.column("model").is_ok());
    }
}
