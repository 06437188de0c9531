//! Local file exporter for run artifacts
//!
//! Layout under the output directory:
//!
//! ```text
//! configurations/configuration_<n>_<model>.json
//! results.jsonl            one line per row, written as rows arrive
//! results_table.csv
//! best_configuration.json
//! dropped_columns.csv
//! ```

use super::ArtifactSink;
use crate::error::Result;
use crate::grid::{GridReport, ResultsRow};
use crate::recipe::ConfigurationSnapshot;
use polars::prelude::*;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Writes artifacts below `base_dir`
#[derive(Debug)]
pub struct FileExporter {
    base_dir: PathBuf,
    rows: Option<BufWriter<File>>,
}

#[derive(Serialize)]
struct BestConfigurationFile<'a> {
    run_id: Uuid,
    metric: &'a str,
    score: f64,
    data_split: &'a str,
    configuration: &'a ConfigurationSnapshot,
    row: Option<&'a ResultsRow>,
}

impl FileExporter {
    /// Create the output directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            rows: None,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn configurations_dir(&self) -> PathBuf {
        self.base_dir.join("configurations")
    }

    pub fn results_path(&self) -> PathBuf {
        self.base_dir.join("results_table.csv")
    }

    pub fn rows_path(&self) -> PathBuf {
        self.base_dir.join("results.jsonl")
    }

    pub fn best_path(&self) -> PathBuf {
        self.base_dir.join("best_configuration.json")
    }

    pub fn dropped_columns_path(&self) -> PathBuf {
        self.base_dir.join("dropped_columns.csv")
    }

    fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(df)?;
        Ok(())
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl ArtifactSink for FileExporter {
    fn save_configuration(&mut self, snapshot: &ConfigurationSnapshot) -> Result<()> {
        let dir = self.configurations_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", snapshot.file_stem()));
        Self::write_json(&path, snapshot)?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    fn save_row(&mut self, row: &ResultsRow) -> Result<()> {
        if self.rows.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(self.rows_path())?;
            self.rows = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.rows.as_mut() {
            serde_json::to_writer(&mut *writer, row)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn finish(&mut self, report: &GridReport) -> Result<()> {
        if let Some(mut writer) = self.rows.take() {
            writer.flush()?;
        }

        let mut results = report.results.to_dataframe()?;
        Self::write_csv(&self.results_path(), &mut results)?;

        let mut dropped = DataFrame::new(vec![Series::new(
            "column".into(),
            report.dropped_columns.clone(),
        )
        .into()])?;
        Self::write_csv(&self.dropped_columns_path(), &mut dropped)?;

        if let (Some(best), Some(configuration)) =
            (report.best.best(), report.best_configuration.as_ref())
        {
            let file = BestConfigurationFile {
                run_id: report.run_id,
                metric: report.best.metric(),
                score: best.score,
                data_split: best.data_split.as_str(),
                configuration,
                row: report.best_row(),
            };
            Self::write_json(&self.best_path(), &file)?;
            // the best configuration is always exported, even without export-all
            self.save_configuration(configuration)?;
        }

        info!(
            output = %self.base_dir.display(),
            rows = report.results.len(),
            "Exported grid artifacts"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, Settings};
    use crate::dataset::{Dataset, SplitStrategy};
    use crate::grid::{GridRunner, RunOptions};
    use crate::recipe::StageOptions;
    use crate::registry::TechniqueRegistry;
    use std::sync::Arc;

    #[test]
    fn test_exports_run_artifacts() {
        let dir = std::env::temp_dir().join(format!("kolosal_grid_export_{}", Uuid::new_v4()));
        let mut exporter = FileExporter::new(&dir).unwrap();

        let df = df!(
            "a" => &[0.0, 0.1, 0.2, 0.3, 1.0, 1.1, 1.2, 1.3],
            "target" => &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]
        )
        .unwrap();
        let mut dataset = Dataset::new(df, "target").unwrap();
        let config = GridConfig::new()
            .with_split(SplitStrategy::Full)
            .with_export_all(true)
            .with_techniques(
                StageOptions::new()
                    .with_stage("scaler", ["none", "minmax"])
                    .with_stage("model", ["knn"]),
            );
        let mut runner = GridRunner::new(
            Arc::new(TechniqueRegistry::builtin()),
            config,
            Settings::new(),
        );
        let report = runner
            .run_with_sink(&mut dataset, &RunOptions::new(), Some(&mut exporter as &mut dyn ArtifactSink))
            .unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(exporter.results_path().exists());
        assert!(exporter.best_path().exists());
        assert!(exporter.dropped_columns_path().exists());
        assert!(exporter
            .configurations_dir()
            .join("configuration_2_knn.json")
            .exists());

        let lines = fs::read_to_string(exporter.rows_path()).unwrap();
        assert_eq!(lines.lines().count(), 2);

        fs::remove_dir_all(&dir).ok();
    }
}
