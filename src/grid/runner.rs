//! Grid runner
//!
//! Expands the configured techniques into numbered configurations and runs
//! each one against the dataset: reset, split, finalize, apply, score. A
//! failure inside one configuration becomes a failed row; only split
//! failures, generation errors and sink errors end the run.

use super::metrics::score_all;
use super::results::{BestTracker, ResultsRow, ResultsTable, RowStatus};
use crate::algorithms::{Parameters, RuntimeContext};
use crate::config::{GridConfig, Settings};
use crate::dataset::{series_to_array, Dataset};
use crate::error::{KolosalError, Result};
use crate::io::ArtifactSink;
use crate::recipe::{Configuration, ConfigurationGenerator, ConfigurationSnapshot};
use crate::registry::TechniqueRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooperative cancellation flag, checked between configurations
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run knobs that are not part of the settings file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured thread count; `Some(1)` still uses a pool
    /// and `Some(0)` is rejected
    pub parallelism: Option<usize>,
    /// Caller overrides per stage name, highest parameter precedence
    pub overrides: BTreeMap<String, Parameters>,
    pub cancel: Option<CancelHandle>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }

    pub fn with_overrides(mut self, stage: impl Into<String>, parameters: Parameters) -> Self {
        self.overrides.insert(stage.into(), parameters);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled)
    }
}

/// Everything a finished (or aborted) run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: ResultsTable,
    pub best: BestTracker,
    pub best_configuration: Option<ConfigurationSnapshot>,
    /// Feature columns dropped by any configuration, first-seen order
    pub dropped_columns: Vec<String>,
    pub configurations_total: usize,
    pub configurations_run: usize,
    pub aborted: bool,
}

impl GridReport {
    pub fn best_row(&self) -> Option<&ResultsRow> {
        let best = self.best.best()?;
        self.results.get(best.configuration_number, best.data_split)
    }
}

/// Borrowed, thread-safe view of what every configuration needs
struct Executor<'a> {
    registry: &'a TechniqueRegistry,
    settings: &'a Settings,
    config: &'a GridConfig,
    metric_names: Vec<String>,
}

impl Executor<'_> {
    /// Run every split pass for one configuration. `Err` only for split
    /// failures, which are fatal to the whole run.
    fn run_configuration(
        &self,
        configuration: &mut Configuration,
        dataset: &mut Dataset,
    ) -> Result<Vec<ResultsRow>> {
        let number = configuration.number();
        let techniques = configuration.techniques();
        let split_settings = self.config.split_settings();
        let mut rows = Vec::new();

        for (pass, split) in self.config.split.passes().into_iter().enumerate() {
            dataset.reset_features()?;
            dataset.split(split, &split_settings)?;

            if pass == 0 {
                let context = RuntimeContext::from_dataset(dataset, self.config.seed);
                if let Err(err) = configuration.finalize(self.registry, &context, self.settings) {
                    warn!(configuration = number, error = %err, "Configuration failed to finalize");
                    return Ok(self
                        .config
                        .split
                        .passes()
                        .into_iter()
                        .map(|split| {
                            ResultsRow::failed(number, split, techniques.clone(), &self.metric_names, &err)
                        })
                        .collect());
                }
            }

            let start = Instant::now();
            let row = match self.apply_and_score(configuration, dataset) {
                Ok(metrics) => ResultsRow {
                    configuration_number: number,
                    data_split: split,
                    stage_techniques: techniques.clone(),
                    parameters: finalized_parameters(configuration),
                    metrics,
                    status: RowStatus::Succeeded,
                    elapsed_secs: start.elapsed().as_secs_f64(),
                },
                Err(err) => {
                    warn!(
                        configuration = number,
                        split = %split,
                        kind = err.kind(),
                        error = %err,
                        "Configuration failed"
                    );
                    let mut row =
                        ResultsRow::failed(number, split, techniques.clone(), &self.metric_names, &err);
                    row.parameters = finalized_parameters(configuration);
                    row.elapsed_secs = start.elapsed().as_secs_f64();
                    row
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    fn apply_and_score(
        &self,
        configuration: &mut Configuration,
        dataset: &mut Dataset,
    ) -> Result<BTreeMap<String, Option<f64>>> {
        configuration.apply(dataset)?;

        let predictions = dataset.take_predictions().ok_or_else(|| {
            KolosalError::ValidationError(format!(
                "terminal technique '{}' produced no predictions",
                configuration.terminal_technique()
            ))
        })?;
        let (_, y_eval) = dataset.evaluation()?;
        let y_eval = series_to_array(y_eval)?;
        score_all(&self.config.metrics, &y_eval, &predictions)
    }
}

fn finalized_parameters(configuration: &Configuration) -> BTreeMap<String, Parameters> {
    configuration
        .stages()
        .filter(|s| s.is_finalized() && !s.is_none())
        .map(|s| (s.name().to_string(), s.parameters().clone()))
        .collect()
}

fn merge_dropped(into: &mut Vec<String>, names: &[String]) {
    for name in names {
        if !into.contains(name) {
            into.push(name.clone());
        }
    }
}

/// A finished configuration with its rows and the columns it dropped
type Outcome = (Configuration, Result<Vec<ResultsRow>>, Vec<String>);

/// Accumulates rows in configuration order
struct RunState {
    results: ResultsTable,
    best: BestTracker,
    configurations_run: usize,
}

/// Runs every configuration of a grid
#[derive(Debug)]
pub struct GridRunner {
    registry: Arc<TechniqueRegistry>,
    config: GridConfig,
    settings: Settings,
    retained: BTreeMap<usize, Configuration>,
    best_number: Option<usize>,
}

impl GridRunner {
    pub fn new(registry: Arc<TechniqueRegistry>, config: GridConfig, settings: Settings) -> Self {
        Self {
            registry,
            config,
            settings,
            retained: BTreeMap::new(),
            best_number: None,
        }
    }

    /// Parse the typed config out of the settings, then build the runner
    pub fn from_settings(registry: Arc<TechniqueRegistry>, settings: Settings) -> Result<Self> {
        let config = GridConfig::from_settings(&settings)?;
        Ok(Self::new(registry, config, settings))
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TechniqueRegistry> {
        &self.registry
    }

    pub fn generator(&self) -> Result<ConfigurationGenerator> {
        ConfigurationGenerator::new(self.config.resolved_stage_order()?)
    }

    /// All configurations of the grid, unfinalized
    pub fn configurations(&self) -> Result<Vec<Configuration>> {
        self.generator()?.generate(&self.config.techniques)
    }

    /// The configuration behind the best row of the last run
    pub fn best_configuration(&self) -> Option<&Configuration> {
        self.best_number.and_then(|n| self.retained.get(&n))
    }

    /// A configuration from the last run; with `conserve_memory` only the best is kept
    pub fn configuration(&self, number: usize) -> Option<&Configuration> {
        self.retained.get(&number)
    }

    pub fn run(&mut self, dataset: &mut Dataset, options: &RunOptions) -> Result<GridReport> {
        self.run_with_sink(dataset, options, None)
    }

    /// Run the grid, handing rows and snapshots to `sink` as they are recorded
    pub fn run_with_sink(
        &mut self,
        dataset: &mut Dataset,
        options: &RunOptions,
        mut sink: Option<&mut dyn ArtifactSink>,
    ) -> Result<GridReport> {
        self.config.validate()?;
        let parallelism = options.parallelism.or(self.config.parallelism);
        if parallelism == Some(0) {
            return Err(KolosalError::ConfigError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if dataset.label() != self.config.label {
            return Err(KolosalError::ConfigError(format!(
                "dataset label '{}' does not match configured label '{}'",
                dataset.label(),
                self.config.label
            )));
        }

        let mut configurations = self.configurations()?;
        for configuration in configurations.iter_mut() {
            for (stage, overrides) in &options.overrides {
                configuration.set_overrides(stage, overrides.clone())?;
            }
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = configurations.len();
        info!(
            run_id = %run_id,
            configurations = total,
            splits = self.config.split.passes().len(),
            parallelism = parallelism.unwrap_or(1),
            "Starting grid run"
        );

        self.retained.clear();
        self.best_number = None;

        let metric_names = self.config.metric_names();
        let mut state = RunState {
            results: ResultsTable::new(
                self.config.resolved_stage_order()?,
                metric_names.clone(),
            ),
            best: BestTracker::new(self.config.primary_metric().name()),
            configurations_run: 0,
        };
        let registry = Arc::clone(&self.registry);
        let settings = self.settings.clone();
        let config = self.config.clone();
        let executor = Executor {
            registry: &registry,
            settings: &settings,
            config: &config,
            metric_names,
        };

        let mut dropped_columns = Vec::new();
        let aborted = match parallelism {
            None => {
                let mut aborted = false;
                for mut configuration in configurations {
                    if options.cancelled() {
                        aborted = true;
                        break;
                    }
                    debug!(configuration = configuration.number(), "Running configuration");
                    let rows = executor.run_configuration(&mut configuration, dataset)?;
                    self.record(&mut state, configuration, rows, &mut sink)?;
                }
                merge_dropped(&mut dropped_columns, dataset.dropped_columns());
                aborted
            }
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| KolosalError::ConfigError(format!("Thread pool error: {}", e)))?;
                let shared: &Dataset = dataset;
                let executor = &executor;
                let halt = AtomicBool::new(false);
                let halt = &halt;
                let (tx, rx) = mpsc::channel::<(usize, Option<Outcome>)>();

                // Finished configurations come back in any order; each is
                // recorded, and released, as soon as every lower number is in.
                pool.in_place_scope(|scope| -> Result<bool> {
                    for (index, mut configuration) in configurations.into_iter().enumerate() {
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let outcome = if options.cancelled() || halt.load(Ordering::SeqCst) {
                                None
                            } else {
                                let mut local = shared.clone();
                                let rows = executor.run_configuration(&mut configuration, &mut local);
                                Some((configuration, rows, local.dropped_columns().to_vec()))
                            };
                            // the receiver is gone only when the run already failed
                            let _ = tx.send((index, outcome));
                        });
                    }
                    drop(tx);

                    let mut pending: BTreeMap<usize, Option<Outcome>> = BTreeMap::new();
                    let mut next = 0;
                    let mut aborted = false;
                    for (index, outcome) in rx.iter() {
                        pending.insert(index, outcome);
                        while let Some(outcome) = pending.remove(&next) {
                            next += 1;
                            let Some((configuration, rows, dropped)) = outcome else {
                                aborted = true;
                                continue;
                            };
                            let recorded = rows.and_then(|rows| {
                                merge_dropped(&mut dropped_columns, &dropped);
                                self.record(&mut state, configuration, rows, &mut sink)
                            });
                            if let Err(err) = recorded {
                                halt.store(true, Ordering::SeqCst);
                                return Err(err);
                            }
                        }
                    }
                    Ok(aborted)
                })?
            }
        };

        state.results.sort();
        if aborted {
            warn!(
                completed = state.configurations_run,
                total, "Grid run cancelled"
            );
        }

        let report = GridReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            best_configuration: self.best_configuration().map(Configuration::snapshot),
            results: state.results,
            best: state.best,
            dropped_columns,
            configurations_total: total,
            configurations_run: state.configurations_run,
            aborted,
        };

        match report.best.best() {
            Some(best) => info!(
                configuration = best.configuration_number,
                split = %best.data_split,
                metric = report.best.metric(),
                score = best.score,
                "Grid run finished"
            ),
            None => warn!("Grid run finished without a successful configuration"),
        }

        if let Some(sink) = sink.as_deref_mut() {
            sink.finish(&report)?;
        }
        Ok(report)
    }

    fn record(
        &mut self,
        state: &mut RunState,
        configuration: Configuration,
        rows: Vec<ResultsRow>,
        sink: &mut Option<&mut dyn ArtifactSink>,
    ) -> Result<()> {
        let number = configuration.number();
        let mut improved = false;

        for row in rows {
            if state.best.observe(&row) {
                improved = true;
                info!(
                    configuration = number,
                    split = %row.data_split,
                    metric = state.best.metric(),
                    score = state.best.best_score().unwrap_or(f64::NAN),
                    "New best configuration"
                );
            } else if self.config.verbose {
                info!(
                    configuration = number,
                    split = %row.data_split,
                    success = row.is_success(),
                    "Recorded configuration"
                );
            }
            if let Some(sink) = sink.as_deref_mut() {
                sink.save_row(&row)?;
            }
            state.results.push(row);
        }
        state.configurations_run += 1;

        if let Some(sink) = sink.as_deref_mut() {
            if self.config.export_all_configurations {
                sink.save_configuration(&configuration.snapshot())?;
            }
        }

        if improved {
            self.best_number = Some(number);
        }
        if self.config.conserve_memory {
            if improved {
                self.retained.clear();
                self.retained.insert(number, configuration);
            }
        } else {
            self.retained.insert(number, configuration);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::StageOptions;
    use polars::prelude::*;

    fn dataset() -> Dataset {
        let df = df!(
            "a" => &[0.1, 0.3, 0.2, 0.4, 0.5, 3.1, 3.3, 3.2, 3.4, 3.5],
            "target" => &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0]
        )
        .unwrap();
        Dataset::new(df, "target").unwrap()
    }

    fn runner(config: GridConfig) -> GridRunner {
        GridRunner::new(Arc::new(TechniqueRegistry::builtin()), config, Settings::new())
    }

    #[test]
    fn test_cancel_handle() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_conserve_memory_keeps_only_best() {
        let config = GridConfig::new()
            .with_split(crate::dataset::SplitStrategy::Full)
            .with_conserve_memory(true)
            .with_techniques(
                StageOptions::new()
                    .with_stage("scaler", ["none", "standard"])
                    .with_stage("model", ["knn"]),
            );
        let mut runner = runner(config);
        let report = runner.run(&mut dataset(), &RunOptions::new()).unwrap();

        assert_eq!(report.results.len(), 2);
        let best = report.best.best_configuration_number().unwrap();
        assert_eq!(runner.best_configuration().unwrap().number(), best);
        assert_eq!(
            (1..=2).filter(|n| runner.configuration(*n).is_some()).count(),
            1
        );
    }

    #[test]
    fn test_missing_predictions_fail_the_row() {
        let config = GridConfig::new()
            .with_split(crate::dataset::SplitStrategy::Full)
            .with_techniques(StageOptions::new().with_stage("model", ["none"]));
        let report = runner(config)
            .run(&mut dataset(), &RunOptions::new())
            .unwrap();
        let row = &report.results.rows()[0];
        assert!(!row.is_success());
        assert!(report.best.best().is_none());
    }

    /// Records row numbers; fails on `fail_on` when set
    #[derive(Default)]
    struct OrderSink {
        numbers: Vec<usize>,
        fail_on: Option<usize>,
    }

    impl ArtifactSink for OrderSink {
        fn save_configuration(&mut self, _snapshot: &ConfigurationSnapshot) -> Result<()> {
            Ok(())
        }

        fn save_row(&mut self, row: &ResultsRow) -> Result<()> {
            if self.fail_on == Some(row.configuration_number) {
                return Err(KolosalError::DataError("disk full".to_string()));
            }
            self.numbers.push(row.configuration_number);
            Ok(())
        }

        fn finish(&mut self, _report: &GridReport) -> Result<()> {
            Ok(())
        }
    }

    fn six_configurations() -> GridConfig {
        GridConfig::new()
            .with_split(crate::dataset::SplitStrategy::Full)
            .with_techniques(
                StageOptions::new()
                    .with_stage("scaler", ["none", "standard", "minmax"])
                    .with_stage("model", ["knn", "logit"]),
            )
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let options = RunOptions::new().with_parallelism(0);
        let err = runner(six_configurations())
            .run(&mut dataset(), &options)
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_parallel_hands_off_in_order_and_conserves_memory() {
        let mut sink = OrderSink::default();
        let mut runner = runner(six_configurations().with_conserve_memory(true));
        let report = runner
            .run_with_sink(
                &mut dataset(),
                &RunOptions::new().with_parallelism(3),
                Some(&mut sink as &mut dyn ArtifactSink),
            )
            .unwrap();

        assert_eq!(sink.numbers, (1..=6).collect::<Vec<_>>());
        assert_eq!(report.configurations_run, 6);
        assert_eq!(
            (1..=6).filter(|n| runner.configuration(*n).is_some()).count(),
            1
        );
        assert_eq!(
            runner.best_configuration().map(Configuration::number),
            report.best.best_configuration_number()
        );
    }

    #[test]
    fn test_parallel_sink_error_ends_run() {
        let mut sink = OrderSink {
            fail_on: Some(2),
            ..OrderSink::default()
        };
        let err = runner(six_configurations())
            .run_with_sink(
                &mut dataset(),
                &RunOptions::new().with_parallelism(2),
                Some(&mut sink as &mut dyn ArtifactSink),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "data");
        assert_eq!(sink.numbers, vec![1]);
    }

    #[test]
    fn test_label_mismatch_is_rejected() {
        let config = GridConfig::new()
            .with_label("y")
            .with_techniques(StageOptions::new().with_stage("model", ["knn"]));
        let err = runner(config)
            .run(&mut dataset(), &RunOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
