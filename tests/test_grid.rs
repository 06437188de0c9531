//! Integration tests for grid runs: failure isolation, ordering, parallel
//! mode, cancellation and parameter precedence

use kolosal_grid::algorithms::Parameters;
use kolosal_grid::config::{GridConfig, Settings};
use kolosal_grid::dataset::{DataSplit, Dataset, SplitStrategy};
use kolosal_grid::error::Result;
use kolosal_grid::grid::{
    BestTracker, CancelHandle, GridReport, GridRunner, MetricKind, ResultsRow, RowStatus,
    RunOptions,
};
use kolosal_grid::io::ArtifactSink;
use kolosal_grid::recipe::{ConfigurationSnapshot, StageOptions};
use kolosal_grid::registry::{TechniqueLocator, TechniqueRegistry};
use polars::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn classification_dataset(n: usize) -> Dataset {
    let target: Vec<f64> = (0..n).map(|i| if i % 3 == 0 { 1.0 } else { 0.0 }).collect();
    let a: Vec<f64> = (0..n)
        .map(|i| target[i] * 4.0 + (i % 5) as f64 * 0.3)
        .collect();
    let b: Vec<f64> = (0..n).map(|i| ((i * 7) % 11) as f64).collect();
    let df = df!("a" => a, "b" => b, "target" => target).unwrap();
    Dataset::new(df, "target").unwrap()
}

fn regression_dataset(n: usize) -> Dataset {
    let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
    let z: Vec<f64> = (0..n).map(|i| ((i * 3) % 7) as f64).collect();
    let target: Vec<f64> = x.iter().zip(&z).map(|(x, z)| 2.0 * x - z + 1.0).collect();
    let df = df!("x" => x, "z" => z, "target" => target).unwrap();
    Dataset::new(df, "target").unwrap()
}

fn runner(config: GridConfig) -> GridRunner {
    GridRunner::new(Arc::new(TechniqueRegistry::builtin()), config, Settings::new())
}

fn params(value: serde_json::Value) -> Parameters {
    serde_json::from_value(value).unwrap()
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_unknown_technique_fails_only_its_row() {
    let config = GridConfig::new()
        .with_metrics(vec![MetricKind::Accuracy, MetricKind::F1])
        .with_techniques(StageOptions::new().with_stage("model", ["knn", "forest", "logit"]));
    let report = runner(config)
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap();

    let rows = report.results.rows();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].is_success());
    assert!(rows[2].is_success());

    let failed = &rows[1];
    assert_eq!(failed.configuration_number, 2);
    match &failed.status {
        RowStatus::Failed { kind, .. } => assert_eq!(kind, "unknown_technique"),
        RowStatus::Succeeded => panic!("configuration 2 should fail"),
    }
    assert!(failed.metrics.values().all(Option::is_none));
    assert_eq!(failed.metrics.len(), 2);

    let best = report.best.best_configuration_number().unwrap();
    assert!(best == 1 || best == 3);
    assert!(!report.aborted);
}

#[test]
fn test_predictor_in_middle_stage_fails_row() {
    let registry = TechniqueRegistry::builtin();
    let knn = registry.resolve("model", "knn").unwrap();
    registry.register_bound("selector", "knn", knn);

    let config = GridConfig::new()
        .with_stage_order(["selector", "model"])
        .with_techniques(
            StageOptions::new()
                .with_stage("selector", ["variance_threshold", "knn"])
                .with_stage("model", ["logit"]),
        );
    let mut runner = GridRunner::new(Arc::new(registry), config, Settings::new());
    let report = runner
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap();

    let rows = report.results.rows();
    assert!(rows[0].is_success());
    match &rows[1].status {
        RowStatus::Failed { kind, .. } => assert_eq!(kind, "unsupported_operation"),
        RowStatus::Succeeded => panic!("a predictor cannot run in the selector stage"),
    }
    assert_eq!(report.best.best_configuration_number(), Some(1));
}

#[test]
fn test_technique_from_another_stage_is_unknown() {
    let config = GridConfig::new()
        .with_techniques(StageOptions::new().with_stage("model", ["knn", "standard"]));
    let report = runner(config)
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap();

    match &report.results.rows()[1].status {
        RowStatus::Failed { kind, .. } => assert_eq!(kind, "unknown_technique"),
        RowStatus::Succeeded => panic!("a scaler name is not a model"),
    }
}

#[test]
fn test_unselected_unavailable_technique_is_harmless() {
    let registry = TechniqueRegistry::builtin();
    registry.register_deferred("model", "xgb", TechniqueLocator::new("xgboost", "XGBClassifier"));
    let config = GridConfig::new()
        .with_techniques(StageOptions::new().with_stage("model", ["knn", "logit"]));

    let mut runner = GridRunner::new(Arc::new(registry), config, Settings::new());
    let report = runner
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap();
    assert!(report.results.rows().iter().all(ResultsRow::is_success));
}

#[test]
fn test_generation_error_aborts_before_running() {
    let config = GridConfig::new()
        .with_stage_order(["model"])
        .with_techniques(
            StageOptions::new()
                .with_stage("model", ["knn"])
                .with_stage("scaler", ["standard"]),
        );
    let err = runner(config)
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap_err();
    assert_eq!(err.kind(), "configuration_generation");
}

// ============================================================================
// Splits and ordering
// ============================================================================

#[test]
fn test_train_test_val_gives_two_rows_per_configuration() {
    let config = GridConfig::new()
        .with_split(SplitStrategy::TrainTestVal)
        .with_techniques(
            StageOptions::new()
                .with_stage("scaler", ["none", "standard"])
                .with_stage("model", ["logit"]),
        );
    let report = runner(config)
        .run(&mut classification_dataset(40), &RunOptions::new())
        .unwrap();

    let order: Vec<(usize, DataSplit)> = report
        .results
        .rows()
        .iter()
        .map(|r| (r.configuration_number, r.data_split))
        .collect();
    assert_eq!(
        order,
        vec![
            (1, DataSplit::TrainTest),
            (1, DataSplit::TrainVal),
            (2, DataSplit::TrainTest),
            (2, DataSplit::TrainVal),
        ]
    );
}

#[test]
fn test_parallel_matches_sequential() {
    let config = GridConfig::new()
        .with_metrics(vec![MetricKind::Accuracy, MetricKind::RocAuc])
        .with_techniques(
            StageOptions::new()
                .with_stage("scaler", ["none", "standard", "minmax"])
                .with_stage("model", ["knn", "forest", "logit"]),
        );

    let sequential = runner(config.clone())
        .run(&mut classification_dataset(45), &RunOptions::new())
        .unwrap();
    let parallel = runner(config)
        .run(
            &mut classification_dataset(45),
            &RunOptions::new().with_parallelism(4),
        )
        .unwrap();

    assert_eq!(sequential.results.len(), 9);
    assert_eq!(parallel.results.len(), 9);
    for (seq, par) in sequential.results.rows().iter().zip(parallel.results.rows()) {
        // timings differ between runs
        assert_eq!(seq.configuration_number, par.configuration_number);
        assert_eq!(seq.stage_techniques, par.stage_techniques);
        assert_eq!(seq.status, par.status);
        assert_eq!(seq.metrics, par.metrics);
        assert_eq!(seq.parameters, par.parameters);
    }
    assert_eq!(
        sequential.best.best_configuration_number(),
        parallel.best.best_configuration_number()
    );
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cancels the run once `after` configurations have been recorded
struct CancellingSink {
    handle: CancelHandle,
    after: usize,
    seen: Vec<usize>,
    finished: bool,
}

impl ArtifactSink for CancellingSink {
    fn save_configuration(&mut self, _snapshot: &ConfigurationSnapshot) -> Result<()> {
        Ok(())
    }

    fn save_row(&mut self, row: &ResultsRow) -> Result<()> {
        if !self.seen.contains(&row.configuration_number) {
            self.seen.push(row.configuration_number);
        }
        if self.seen.len() >= self.after {
            self.handle.cancel();
        }
        Ok(())
    }

    fn finish(&mut self, _report: &GridReport) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[test]
fn test_cancel_between_configurations() {
    let handle = CancelHandle::new();
    let mut sink = CancellingSink {
        handle: handle.clone(),
        after: 2,
        seen: Vec::new(),
        finished: false,
    };
    let config = GridConfig::new()
        .with_techniques(StageOptions::new().with_stage("model", ["knn", "logit", "ols"]));
    let options = RunOptions::new().with_cancel(handle);

    let report = runner(config)
        .run_with_sink(
            &mut classification_dataset(30),
            &options,
            Some(&mut sink as &mut dyn ArtifactSink),
        )
        .unwrap();

    assert!(report.aborted);
    assert_eq!(report.configurations_run, 2);
    assert_eq!(report.configurations_total, 3);
    assert_eq!(report.results.len(), 2);
    assert!(sink.finished);
}

#[test]
fn test_cancelled_before_start_runs_nothing() {
    let handle = CancelHandle::new();
    handle.cancel();
    let config = GridConfig::new()
        .with_techniques(StageOptions::new().with_stage("model", ["knn", "logit"]));

    for options in [
        RunOptions::new().with_cancel(handle.clone()),
        RunOptions::new().with_cancel(handle.clone()).with_parallelism(2),
    ] {
        let report = runner(config.clone())
            .run(&mut classification_dataset(30), &options)
            .unwrap();
        assert!(report.aborted);
        assert!(report.results.is_empty());
        assert!(report.best.best().is_none());
    }
}

// ============================================================================
// Parameters and scoring
// ============================================================================

#[test]
fn test_override_beats_settings_sections() {
    let settings = Settings::new()
        .with_section("knn_parameters", json!({"n_neighbors": 3, "weights": "distance"}))
        .unwrap();
    let config = GridConfig::new()
        .with_techniques(StageOptions::new().with_stage("model", ["knn"]));
    let mut runner = GridRunner::new(Arc::new(TechniqueRegistry::builtin()), config, settings);

    let options = RunOptions::new().with_overrides("model", params(json!({"n_neighbors": 1})));
    let report = runner
        .run(&mut classification_dataset(30), &options)
        .unwrap();

    let row = &report.results.rows()[0];
    assert!(row.is_success());
    let model = &row.parameters["model"];
    assert_eq!(model["n_neighbors"], json!(1));
    assert_eq!(model["weights"], json!("distance"));
    assert_eq!(model["metric"], json!("euclidean"));
}

#[test]
fn test_unknown_parameter_fails_row() {
    let settings = Settings::new()
        .with_section("logit_parameters", json!({"depth": 3}))
        .unwrap();
    let config = GridConfig::new()
        .with_techniques(StageOptions::new().with_stage("model", ["knn", "logit"]));
    let mut runner = GridRunner::new(Arc::new(TechniqueRegistry::builtin()), config, settings);
    let report = runner
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap();

    assert!(report.results.rows()[0].is_success());
    match &report.results.rows()[1].status {
        RowStatus::Failed { kind, .. } => assert_eq!(kind, "invalid_parameter"),
        RowStatus::Succeeded => panic!("unknown parameter should fail the row"),
    }
}

#[test]
fn test_regression_grid_uses_negated_losses() {
    let config = GridConfig::new()
        .with_metrics(vec![MetricKind::NegMse, MetricKind::R2])
        .with_techniques(
            StageOptions::new()
                .with_stage("scaler", ["none", "standard"])
                .with_stage("model", ["ols"]),
        );
    let mut runner = runner(config);
    let report = runner
        .run(&mut regression_dataset(40), &RunOptions::new())
        .unwrap();

    assert_eq!(report.best.metric(), "neg_mse");
    for row in report.results.rows() {
        assert!(row.is_success());
        let mse = row.score("neg_mse").unwrap();
        assert!(mse <= 0.0);
        assert!(row.score("r2").unwrap() > 0.99);
    }
    assert!(runner.best_configuration().is_some());
}

#[test]
fn test_probability_metrics_without_probabilities_are_null() {
    let config = GridConfig::new()
        .with_metrics(vec![MetricKind::Accuracy, MetricKind::NegLogLoss])
        .with_techniques(StageOptions::new().with_stage("model", ["ols"]));
    let report = runner(config)
        .run(&mut classification_dataset(30), &RunOptions::new())
        .unwrap();

    let row = &report.results.rows()[0];
    assert!(row.is_success());
    assert_eq!(row.metrics["neg_log_loss"], None);
    assert!(row.metrics["accuracy"].is_some());
}

#[test]
fn test_full_pipeline_with_encoder_and_sampler() {
    let n = 36;
    let target: Vec<f64> = (0..n).map(|i| if i % 4 == 0 { 1.0 } else { 0.0 }).collect();
    let color: Vec<&str> = (0..n)
        .map(|i| if i % 4 == 0 { "red" } else if i % 2 == 0 { "blue" } else { "green" })
        .collect();
    let size: Vec<f64> = (0..n).map(|i| (i % 6) as f64 + target[i] * 2.0).collect();
    let df = df!("color" => color, "size" => size, "target" => target).unwrap();
    let mut dataset = Dataset::new(df, "target").unwrap();

    let config = GridConfig::new()
        .with_metrics(vec![MetricKind::BalancedAccuracy, MetricKind::Recall])
        .with_techniques(
            StageOptions::new()
                .with_stage("scaler", ["standard"])
                .with_stage("encoder", ["onehot", "ordinal", "frequency"])
                .with_stage("sampler", ["none", "random_over", "random_under"])
                .with_stage("model", ["logit"]),
        );
    let mut runner = runner(config);
    let report = runner.run(&mut dataset, &RunOptions::new()).unwrap();

    assert_eq!(report.results.len(), 9);
    assert!(report.results.rows().iter().all(ResultsRow::is_success));
    assert_eq!(
        report.results.stage_order(),
        &["scaler", "encoder", "sampler", "model"]
    );
    // the source frame is never modified by a configuration
    assert_eq!(dataset.source_columns().len(), 2);
    assert_eq!(dataset.source().width(), 3);
}

#[test]
fn test_best_tracker_keeps_first_maximum() {
    let values = [0.4, 0.9, 0.2, 0.9, 0.7];
    let mut tracker = BestTracker::new("accuracy");
    for (i, value) in values.iter().enumerate() {
        let row = ResultsRow {
            configuration_number: i + 1,
            data_split: DataSplit::TrainTest,
            stage_techniques: vec![("model".to_string(), "knn".to_string())],
            parameters: BTreeMap::new(),
            metrics: BTreeMap::from([("accuracy".to_string(), Some(*value))]),
            status: RowStatus::Succeeded,
            elapsed_secs: 0.0,
        };
        tracker.observe(&row);
    }
    assert_eq!(tracker.best_score(), Some(0.9));
    assert_eq!(tracker.best_configuration_number(), Some(2));
}
