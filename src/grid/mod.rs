//! Running a grid of configurations and keeping score

mod metrics;
mod results;
mod runner;

pub use metrics::{score_all, MetricKind};
pub use results::{BestEntry, BestTracker, ResultsRow, ResultsTable, RowStatus};
pub use runner::{CancelHandle, GridReport, GridRunner, RunOptions};
