//! Built-in technique catalog
//!
//! One declarative table of stage, technique and locator. The registry loads
//! it as deferred entries; nothing here is imported until resolved.

use super::loader::BuiltinModules;
use super::reference::TechniqueLocator;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub stage: &'static str,
    pub technique: &'static str,
    pub module: &'static str,
    pub symbol: &'static str,
}

impl CatalogEntry {
    const fn new(
        stage: &'static str,
        technique: &'static str,
        module: &'static str,
        symbol: &'static str,
    ) -> Self {
        Self {
            stage,
            technique,
            module,
            symbol,
        }
    }

    pub fn locator(&self) -> TechniqueLocator {
        TechniqueLocator::new(self.module, self.symbol)
    }
}

pub const BUILTIN_CATALOG: &[CatalogEntry] = &[
    CatalogEntry::new("scaler", "standard", BuiltinModules::SCALER, "StandardScaler"),
    CatalogEntry::new("scaler", "minmax", BuiltinModules::SCALER, "MinMaxScaler"),
    CatalogEntry::new("scaler", "robust", BuiltinModules::SCALER, "RobustScaler"),
    CatalogEntry::new("scaler", "maxabs", BuiltinModules::SCALER, "MaxAbsScaler"),
    CatalogEntry::new("encoder", "ordinal", BuiltinModules::ENCODER, "OrdinalEncoder"),
    CatalogEntry::new("encoder", "onehot", BuiltinModules::ENCODER, "OneHotEncoder"),
    CatalogEntry::new("encoder", "frequency", BuiltinModules::ENCODER, "FrequencyEncoder"),
    CatalogEntry::new("sampler", "random_over", BuiltinModules::SAMPLER, "RandomOverSampler"),
    CatalogEntry::new("sampler", "random_under", BuiltinModules::SAMPLER, "RandomUnderSampler"),
    CatalogEntry::new("selector", "variance_threshold", BuiltinModules::SELECTOR, "VarianceThreshold"),
    CatalogEntry::new("selector", "kbest_correlation", BuiltinModules::SELECTOR, "SelectKBestCorrelation"),
    CatalogEntry::new("model", "logit", BuiltinModules::LINEAR_MODELS, "LogisticRegression"),
    CatalogEntry::new("model", "ols", BuiltinModules::LINEAR_MODELS, "LinearRegression"),
    CatalogEntry::new("model", "knn", BuiltinModules::KNN, "KNeighbors"),
];

/// Canonical stage order; runs keep only the stages they configure
pub const DEFAULT_STAGE_ORDER: &[&str] = &[
    "scaler",
    "splitter",
    "encoder",
    "interactor",
    "splicer",
    "sampler",
    "selector",
    "custom",
    "model",
];
