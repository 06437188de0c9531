//! Data sources and artifact sinks

mod exporter;
mod loader;

pub use exporter::FileExporter;
pub use loader::{DataFormat, DataLoader};

use crate::dataset::Dataset;
use crate::error::Result;
use crate::grid::{GridReport, ResultsRow};
use crate::recipe::ConfigurationSnapshot;
use std::path::Path;

/// Produces the dataset a grid runs against
pub trait DataSource {
    fn load(&self, path: &Path, label: &str) -> Result<Dataset>;
}

/// Receives run artifacts as they are produced
pub trait ArtifactSink {
    /// Called after a configuration's rows are recorded, when exporting all
    fn save_configuration(&mut self, snapshot: &ConfigurationSnapshot) -> Result<()>;

    /// Called once per results row, in configuration order
    fn save_row(&mut self, row: &ResultsRow) -> Result<()>;

    /// Called once at the end of the run, also after cancellation
    fn finish(&mut self, report: &GridReport) -> Result<()>;
}
