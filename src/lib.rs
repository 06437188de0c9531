//! Kolosal Grid - recipe grid engine for Kolosal AutoML
//!
//! Declare candidate techniques per pipeline stage; the engine expands them
//! into every combination, runs each configuration against a shared dataset
//! and keeps the best one by a primary metric.
//!
//! # Modules
//!
//! ## Core
//! - [`registry`] - Lazy technique registry and the built-in catalog
//! - [`recipe`] - Stages, configurations and the configuration generator
//! - [`grid`] - Grid runner, metrics, results table and best tracker
//! - [`dataset`] - Dataset container, column metadata and splitting
//!
//! ## Techniques
//! - [`algorithms`] - Capability traits, factories and built-in techniques
//!
//! ## Services
//! - [`config`] - Settings and the typed grid configuration
//! - [`io`] - Data loading and artifact export
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core
pub mod dataset;
pub mod grid;
pub mod recipe;
pub mod registry;

// Techniques
pub mod algorithms;

// Services
pub mod cli;
pub mod config;
pub mod io;

pub use error::{KolosalError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{KolosalError, Result};

    // Registry
    pub use crate::registry::{
        BuiltinModules, ModuleLoader, TechniqueLocator, TechniqueReference, TechniqueRegistry,
        NONE_TECHNIQUE,
    };

    // Recipes
    pub use crate::recipe::{generate, Configuration, ConfigurationGenerator, Stage, StageOptions};

    // Grid
    pub use crate::grid::{
        BestTracker, CancelHandle, GridReport, GridRunner, MetricKind, ResultsRow, ResultsTable,
        RowStatus, RunOptions,
    };

    // Data
    pub use crate::dataset::{ColumnKind, ColumnMap, DataSplit, Dataset, SplitStrategy};

    // Algorithms
    pub use crate::algorithms::{
        Algorithm, AlgorithmFactory, Capability, CustomApplier, Fitter, FnFactory, Parameters,
        Predictions, Predictor, RuntimeContext, Transformer,
    };

    // Config and I/O
    pub use crate::config::{GridConfig, Settings};
    pub use crate::io::{ArtifactSink, DataLoader, DataSource, FileExporter};
}
