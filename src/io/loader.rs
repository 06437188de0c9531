//! File loading via polars

use super::DataSource;
use crate::dataset::Dataset;
use crate::error::{KolosalError, Result};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv { separator: u8 },
    Parquet,
    Json,
}

impl DataFormat {
    /// Guess from the file extension; unknown extensions read as CSV
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "tsv" => DataFormat::Csv { separator: b'\t' },
            "parquet" | "pq" => DataFormat::Parquet,
            "json" | "jsonl" | "ndjson" => DataFormat::Json,
            _ => DataFormat::Csv { separator: b',' },
        }
    }
}

/// Loads a table and prepares the dataset container
#[derive(Debug, Clone)]
pub struct DataLoader {
    infer_schema_length: Option<usize>,
    categorize_threshold: Option<usize>,
    fill_nulls: bool,
    downcast: bool,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            infer_schema_length: Some(100),
            categorize_threshold: None,
            fill_nulls: false,
            downcast: false,
        }
    }

    /// Rows scanned to infer CSV column types; `None` scans everything
    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Mark non-boolean columns with fewer unique values than `threshold` categorical
    pub fn with_auto_categorize(mut self, threshold: usize) -> Self {
        self.categorize_threshold = Some(threshold);
        self
    }

    pub fn with_fill_nulls(mut self, fill: bool) -> Self {
        self.fill_nulls = fill;
        self
    }

    pub fn with_downcast(mut self, downcast: bool) -> Self {
        self.downcast = downcast;
        self
    }

    pub fn read_frame(&self, path: &Path) -> Result<DataFrame> {
        let file = File::open(path)?;
        let df = match DataFormat::from_path(path) {
            DataFormat::Csv { separator } => CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(self.infer_schema_length)
                .with_parse_options(CsvParseOptions::default().with_separator(separator))
                .into_reader_with_file_handle(file)
                .finish()?,
            DataFormat::Parquet => ParquetReader::new(file).finish()?,
            DataFormat::Json => JsonReader::new(file)
                .with_json_format(JsonFormat::JsonLines)
                .finish()?,
        };
        Ok(df)
    }
}

impl DataSource for DataLoader {
    fn load(&self, path: &Path, label: &str) -> Result<Dataset> {
        let start = Instant::now();
        let df = self.read_frame(path)?;
        if df.height() == 0 {
            return Err(KolosalError::DataError(format!(
                "{} contains no rows",
                path.display()
            )));
        }

        let mut dataset = Dataset::new(df, label)?;
        if self.fill_nulls {
            dataset.smart_fill_nulls()?;
        }
        if self.downcast {
            dataset.downcast()?;
        }
        if let Some(threshold) = self.categorize_threshold {
            dataset.auto_categorize(threshold)?;
        }

        info!(
            path = %path.display(),
            rows = dataset.n_rows(),
            columns = dataset.source_columns().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded dataset"
        );
        Ok(dataset)
    }
}
