//! Technique references held by the registry

use crate::algorithms::AlgorithmFactory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Module path plus symbol name, resolved on first use
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechniqueLocator {
    pub module: String,
    pub symbol: String,
}

impl TechniqueLocator {
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for TechniqueLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.symbol)
    }
}

/// Registry entry: deferred until resolved, then bound for the rest of the process
#[derive(Debug, Clone)]
pub enum TechniqueReference {
    Deferred(TechniqueLocator),
    Bound(Arc<dyn AlgorithmFactory>),
}

impl TechniqueReference {
    pub fn is_bound(&self) -> bool {
        matches!(self, TechniqueReference::Bound(_))
    }

    pub fn locator(&self) -> Option<&TechniqueLocator> {
        match self {
            TechniqueReference::Deferred(locator) => Some(locator),
            TechniqueReference::Bound(_) => None,
        }
    }
}

impl From<TechniqueLocator> for TechniqueReference {
    fn from(locator: TechniqueLocator) -> Self {
        TechniqueReference::Deferred(locator)
    }
}

impl From<Arc<dyn AlgorithmFactory>> for TechniqueReference {
    fn from(factory: Arc<dyn AlgorithmFactory>) -> Self {
        TechniqueReference::Bound(factory)
    }
}
