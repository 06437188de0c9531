//! K-nearest neighbors technique
//!
//! One predictor serves both tasks: majority vote for classification, mean of
//! neighbor targets for regression. Queries run in parallel over rows.

use super::{Algorithm, AlgorithmFactory, ParamReader, Parameters, Predictor};
use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
}

impl FromStr for DistanceMetric {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "manhattan" => Ok(DistanceMetric::Manhattan),
            other => Err(KolosalError::invalid_parameter(
                "metric",
                other,
                "expected euclidean or manhattan",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Inverse distance
    Distance,
}

impl FromStr for WeightScheme {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(WeightScheme::Uniform),
            "distance" => Ok(WeightScheme::Distance),
            other => Err(KolosalError::invalid_parameter(
                "weights",
                other,
                "expected uniform or distance",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KnnTask {
    #[default]
    Classification,
    Regression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnConfig {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    pub weights: WeightScheme,
    pub task: KnnTask,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
            task: KnnTask::Classification,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnModel {
    config: KnnConfig,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
}

impl KnnModel {
    pub fn new(config: KnnConfig) -> Self {
        Self {
            config,
            x_train: None,
            y_train: None,
        }
    }

    fn fitted(&self) -> Result<(&Array2<f64>, &Array1<f64>)> {
        match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(KolosalError::ModelNotFitted),
        }
    }

    fn check_width(&self, x: &Array2<f64>, x_train: &Array2<f64>) -> Result<()> {
        if x.ncols() != x_train.ncols() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} features", x_train.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }

    fn neighbors_per_row(&self, x: &Array2<f64>) -> Result<Vec<Vec<(f64, f64)>>> {
        let (x_train, y_train) = self.fitted()?;
        self.check_width(x, x_train)?;
        let k = self.config.n_neighbors;
        let metric = self.config.metric;

        let rows: Vec<usize> = (0..x.nrows()).collect();
        Ok(rows
            .into_par_iter()
            .map(|i| find_k_nearest(x.row(i), x_train, y_train, k, metric))
            .collect())
    }
}

impl Predictor for KnnModel {
    /// Stores the training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(KolosalError::DataError("no training rows".to_string()));
        }
        self.x_train = Some(x.clone());
        self.y_train = Some(y.clone());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let weights = self.config.weights;
        let task = self.config.task;
        let predictions: Vec<f64> = self
            .neighbors_per_row(x)?
            .iter()
            .map(|neighbors| match task {
                KnnTask::Classification => vote_classify(neighbors, weights),
                KnnTask::Regression => weighted_mean(neighbors, weights),
            })
            .collect();
        Ok(Array1::from_vec(predictions))
    }

    /// Weighted share of positive neighbors; classification only
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array1<f64>>> {
        if self.config.task == KnnTask::Regression {
            return Ok(None);
        }
        let weights = self.config.weights;
        let proba: Vec<f64> = self
            .neighbors_per_row(x)?
            .iter()
            .map(|neighbors| {
                let mut positive = 0.0;
                let mut total = 0.0;
                for &(dist, label) in neighbors {
                    let w = weight_of(dist, weights);
                    if label >= 0.5 {
                        positive += w;
                    }
                    total += w;
                }
                if total > 0.0 {
                    positive / total
                } else {
                    0.0
                }
            })
            .collect();
        Ok(Some(Array1::from_vec(proba)))
    }
}

/// Max-heap entry keeping the k smallest distances
#[derive(PartialEq)]
struct DistLabel(f64, f64);

impl Eq for DistLabel {}

impl PartialOrd for DistLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// O(n log k) neighbor search
fn find_k_nearest(
    point: ArrayView1<f64>,
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    k: usize,
    metric: DistanceMetric,
) -> Vec<(f64, f64)> {
    let mut heap = BinaryHeap::with_capacity(k + 1);

    for (i, row) in x_train.rows().into_iter().enumerate() {
        let dist = compute_distance(point, row, metric);
        if heap.len() < k {
            heap.push(DistLabel(dist, y_train[i]));
        } else if let Some(top) = heap.peek() {
            if dist < top.0 {
                heap.pop();
                heap.push(DistLabel(dist, y_train[i]));
            }
        }
    }

    heap.into_sorted_vec().into_iter().map(|dl| (dl.0, dl.1)).collect()
}

fn compute_distance(a: ArrayView1<f64>, b: ArrayView1<f64>, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Euclidean => a
            .iter()
            .zip(b.iter())
            .map(|(ai, bi)| (ai - bi).powi(2))
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(ai, bi)| (ai - bi).abs()).sum(),
    }
}

fn weight_of(dist: f64, weights: WeightScheme) -> f64 {
    match weights {
        WeightScheme::Uniform => 1.0,
        WeightScheme::Distance => 1.0 / (dist + 1e-10),
    }
}

/// Weighted majority vote; ties go to the smaller label
fn vote_classify(neighbors: &[(f64, f64)], weights: WeightScheme) -> f64 {
    let mut votes: BTreeMap<i64, f64> = BTreeMap::new();
    for &(dist, label) in neighbors {
        *votes.entry(label.round() as i64).or_insert(0.0) += weight_of(dist, weights);
    }
    let mut best: Option<(i64, f64)> = None;
    for (label, vote) in votes {
        if best.map_or(true, |(_, v)| vote > v) {
            best = Some((label, vote));
        }
    }
    best.map(|(label, _)| label as f64).unwrap_or(0.0)
}

fn weighted_mean(neighbors: &[(f64, f64)], weights: WeightScheme) -> f64 {
    let (sum, total) = neighbors.iter().fold((0.0, 0.0), |(s, t), &(dist, target)| {
        let w = weight_of(dist, weights);
        (s + w * target, t + w)
    });
    if total > 0.0 {
        sum / total
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KnnFactory;

impl AlgorithmFactory for KnnFactory {
    fn name(&self) -> &str {
        "knn"
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([
            ("n_neighbors".to_string(), Value::from(5u64)),
            ("metric".to_string(), Value::from("euclidean")),
            ("weights".to_string(), Value::from("uniform")),
            ("task".to_string(), Value::from("classification")),
        ])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(
            self.name(),
            parameters,
            &["n_neighbors", "metric", "weights", "task"],
        )?;

        let n_neighbors = reader.usize("n_neighbors", 5)?;
        if n_neighbors == 0 {
            return Err(KolosalError::invalid_parameter("n_neighbors", 0, "must be positive"));
        }
        let task = match reader.string("task", "classification")?.as_str() {
            "classification" => KnnTask::Classification,
            "regression" => KnnTask::Regression,
            other => {
                return Err(KolosalError::invalid_parameter(
                    "task",
                    other,
                    "expected classification or regression",
                ))
            }
        };

        let config = KnnConfig {
            n_neighbors,
            metric: reader.string("metric", "euclidean")?.parse()?,
            weights: reader.string("weights", "uniform")?.parse()?,
            task,
        };
        Ok(Algorithm::Predictor(Box::new(KnnModel::new(config))))
    }
}

/// Symbols exported to the technique loader
pub fn symbols() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)> {
    vec![("KNeighbors", Arc::new(KnnFactory))]
}
