//! Scoring metrics
//!
//! Every metric is higher-is-better. Losses are reported negated
//! (`neg_log_loss`, `neg_mse`, ...), so the best tracker only ever compares
//! with `>`.

use crate::algorithms::Predictions;
use crate::error::{KolosalError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Accuracy,
    BalancedAccuracy,
    Precision,
    Recall,
    F1,
    RocAuc,
    NegLogLoss,
    NegBrierScore,
    R2,
    NegMse,
    NegRmse,
    NegMae,
}

impl MetricKind {
    pub const ALL: [MetricKind; 12] = [
        MetricKind::Accuracy,
        MetricKind::BalancedAccuracy,
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::F1,
        MetricKind::RocAuc,
        MetricKind::NegLogLoss,
        MetricKind::NegBrierScore,
        MetricKind::R2,
        MetricKind::NegMse,
        MetricKind::NegRmse,
        MetricKind::NegMae,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::BalancedAccuracy => "balanced_accuracy",
            MetricKind::Precision => "precision",
            MetricKind::Recall => "recall",
            MetricKind::F1 => "f1",
            MetricKind::RocAuc => "roc_auc",
            MetricKind::NegLogLoss => "neg_log_loss",
            MetricKind::NegBrierScore => "neg_brier_score",
            MetricKind::R2 => "r2",
            MetricKind::NegMse => "neg_mse",
            MetricKind::NegRmse => "neg_rmse",
            MetricKind::NegMae => "neg_mae",
        }
    }

    /// Needs positive-class probabilities rather than labels
    pub fn needs_probabilities(&self) -> bool {
        matches!(
            self,
            MetricKind::RocAuc | MetricKind::NegLogLoss | MetricKind::NegBrierScore
        )
    }

    /// Score predictions against true labels. `None` when the metric cannot
    /// be computed: no probabilities, or a single class for `roc_auc`.
    pub fn compute(&self, y_true: &Array1<f64>, predictions: &Predictions) -> Result<Option<f64>> {
        let y_pred = &predictions.labels;
        check_lengths(y_true, y_pred)?;

        if self.needs_probabilities() {
            let proba = match &predictions.probabilities {
                Some(p) => p,
                None => return Ok(None),
            };
            check_lengths(y_true, proba)?;
            return Ok(match self {
                MetricKind::RocAuc => roc_auc(y_true, proba),
                MetricKind::NegLogLoss => Some(-log_loss(y_true, proba)),
                _ => Some(-brier_score(y_true, proba)),
            });
        }

        let n = y_true.len() as f64;
        let value = match self {
            MetricKind::Accuracy => {
                let correct = y_true
                    .iter()
                    .zip(y_pred.iter())
                    .filter(|(t, p)| (*t - *p).abs() < 0.5)
                    .count();
                correct as f64 / n
            }
            MetricKind::BalancedAccuracy => balanced_accuracy(y_true, y_pred),
            MetricKind::Precision => {
                let (tp, fp, _, _) = confusion_counts(y_true, y_pred);
                ratio(tp, tp + fp)
            }
            MetricKind::Recall => {
                let (tp, _, _, fn_) = confusion_counts(y_true, y_pred);
                ratio(tp, tp + fn_)
            }
            MetricKind::F1 => {
                let (tp, fp, _, fn_) = confusion_counts(y_true, y_pred);
                let p = ratio(tp, tp + fp);
                let r = ratio(tp, tp + fn_);
                if p + r > 0.0 {
                    2.0 * p * r / (p + r)
                } else {
                    0.0
                }
            }
            MetricKind::R2 => {
                let y_mean = y_true.sum() / n;
                let ss_tot: f64 = y_true.iter().map(|y| (y - y_mean).powi(2)).sum();
                let ss_res: f64 = y_true
                    .iter()
                    .zip(y_pred.iter())
                    .map(|(t, p)| (t - p).powi(2))
                    .sum();
                if ss_tot > 0.0 {
                    1.0 - ss_res / ss_tot
                } else {
                    0.0
                }
            }
            MetricKind::NegMse => -mse(y_true, y_pred),
            MetricKind::NegRmse => -mse(y_true, y_pred).sqrt(),
            MetricKind::NegMae => {
                -y_true
                    .iter()
                    .zip(y_pred.iter())
                    .map(|(t, p)| (t - p).abs())
                    .sum::<f64>()
                    / n
            }
            MetricKind::RocAuc | MetricKind::NegLogLoss | MetricKind::NegBrierScore => {
                unreachable!("probability metrics handled above")
            }
        };
        Ok(Some(value))
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        MetricKind::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| KolosalError::ConfigError(format!("unknown metric '{}'", s)))
    }
}

/// Score every metric; keys are metric names
pub fn score_all(
    metrics: &[MetricKind],
    y_true: &Array1<f64>,
    predictions: &Predictions,
) -> Result<BTreeMap<String, Option<f64>>> {
    if y_true.is_empty() {
        return Err(KolosalError::ValidationError(
            "cannot score an empty evaluation set".to_string(),
        ));
    }
    metrics
        .iter()
        .map(|m| Ok((m.name().to_string(), m.compute(y_true, predictions)?)))
        .collect()
}

fn check_lengths(y_true: &Array1<f64>, other: &Array1<f64>) -> Result<()> {
    if y_true.len() != other.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", other.len()),
        });
    }
    Ok(())
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

fn confusion_counts(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> (usize, usize, usize, usize) {
    let mut tp = 0;
    let mut fp = 0;
    let mut tn = 0;
    let mut fn_ = 0;

    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        match (*t > 0.5, *p > 0.5) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }

    (tp, fp, tn, fn_)
}

/// Mean per-class recall
fn balanced_accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mut per_class: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        let entry = per_class.entry(t.round() as i64).or_insert((0, 0));
        entry.1 += 1;
        if (t - p).abs() < 0.5 {
            entry.0 += 1;
        }
    }
    if per_class.is_empty() {
        return 0.0;
    }
    per_class
        .values()
        .map(|&(hit, total)| ratio(hit, total))
        .sum::<f64>()
        / per_class.len() as f64
}

fn mse(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

fn log_loss(y_true: &Array1<f64>, proba: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    let total: f64 = y_true
        .iter()
        .zip(proba.iter())
        .map(|(&t, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            if t > 0.5 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y_true.len() as f64
}

fn brier_score(y_true: &Array1<f64>, proba: &Array1<f64>) -> f64 {
    y_true
        .iter()
        .zip(proba.iter())
        .map(|(&t, &p)| {
            let target = if t > 0.5 { 1.0 } else { 0.0 };
            (p - target).powi(2)
        })
        .sum::<f64>()
        / y_true.len() as f64
}

/// Rank-based AUC (Mann-Whitney U) with tied scores averaged
fn roc_auc(y_true: &Array1<f64>, proba: &Array1<f64>) -> Option<f64> {
    let mut pairs: Vec<(f64, bool)> = proba
        .iter()
        .zip(y_true.iter())
        .map(|(&p, &t)| (p, t > 0.5))
        .collect();
    let n_pos = pairs.iter().filter(|(_, pos)| *pos).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        // ranks are 1-based; ties share the average rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let positives = pairs[i..=j].iter().filter(|(_, pos)| *pos).count();
        rank_sum_pos += avg_rank * positives as f64;
        i = j + 1;
    }

    let u = rank_sum_pos - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}
