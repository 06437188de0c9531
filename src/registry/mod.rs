//! Lazy technique registry
//!
//! Maps `(stage, technique)` to a [`TechniqueReference`]. Deferred entries are
//! imported through a [`ModuleLoader`] on first resolution and then
//! overwritten with the bound factory, so later lookups are import-free and
//! return the same `Arc`.
//!
//! The registry is shared read-mostly state: lookups take the read lock, the
//! memoizing write takes the write lock and re-checks the entry. Imported
//! modules are cached per path, so techniques sharing a module import it
//! once between them.

pub mod catalog;
mod loader;
mod reference;

pub use catalog::{CatalogEntry, BUILTIN_CATALOG, DEFAULT_STAGE_ORDER};
pub use loader::{BuiltinModules, ModuleBuilder, ModuleLoader, SymbolTable, TechniqueModule};
pub use reference::{TechniqueLocator, TechniqueReference};

use crate::algorithms::AlgorithmFactory;
use crate::error::{KolosalError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Technique name meaning "skip this stage"; never looked up
pub const NONE_TECHNIQUE: &str = "none";

type StageEntries = BTreeMap<String, BTreeMap<String, TechniqueReference>>;

#[derive(Debug)]
pub struct TechniqueRegistry {
    entries: RwLock<StageEntries>,
    modules: Mutex<HashMap<String, Arc<dyn TechniqueModule>>>,
    loader: Arc<dyn ModuleLoader>,
}

impl TechniqueRegistry {
    /// Empty registry importing through `loader`
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            modules: Mutex::new(HashMap::new()),
            loader,
        }
    }

    /// Registry preloaded with the built-in catalog, all entries deferred
    pub fn builtin() -> Self {
        let registry = Self::new(Arc::new(BuiltinModules::new()));
        registry.register_catalog(BUILTIN_CATALOG);
        registry
    }

    pub fn register_catalog(&self, catalog: &[CatalogEntry]) {
        let mut entries = self.entries.write();
        for entry in catalog {
            entries
                .entry(entry.stage.to_string())
                .or_default()
                .insert(entry.technique.to_string(), entry.locator().into());
        }
    }

    /// Add or replace a deferred entry
    pub fn register_deferred(
        &self,
        stage: impl Into<String>,
        technique: impl Into<String>,
        locator: TechniqueLocator,
    ) {
        self.insert(stage.into(), technique.into(), locator.into());
    }

    /// Add or replace an entry with an already-built factory
    pub fn register_bound(
        &self,
        stage: impl Into<String>,
        technique: impl Into<String>,
        factory: Arc<dyn AlgorithmFactory>,
    ) {
        self.insert(stage.into(), technique.into(), factory.into());
    }

    fn insert(&self, stage: String, technique: String, reference: TechniqueReference) {
        self.entries
            .write()
            .entry(stage)
            .or_default()
            .insert(technique, reference);
    }

    pub fn remove(&self, stage: &str, technique: &str) -> Option<TechniqueReference> {
        self.entries.write().get_mut(stage)?.remove(technique)
    }

    pub fn contains(&self, stage: &str, technique: &str) -> bool {
        self.entries
            .read()
            .get(stage)
            .is_some_and(|t| t.contains_key(technique))
    }

    /// Whether the entry has been resolved to a factory
    pub fn is_bound(&self, stage: &str, technique: &str) -> bool {
        self.entries
            .read()
            .get(stage)
            .and_then(|t| t.get(technique))
            .is_some_and(TechniqueReference::is_bound)
    }

    pub fn stages(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Technique names registered for a stage, sorted
    pub fn techniques(&self, stage: &str) -> Vec<String> {
        self.entries
            .read()
            .get(stage)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every entry as `(stage, technique, reference)`
    pub fn entries(&self) -> Vec<(String, String, TechniqueReference)> {
        self.entries
            .read()
            .iter()
            .flat_map(|(stage, techniques)| {
                techniques
                    .iter()
                    .map(move |(name, reference)| (stage.clone(), name.clone(), reference.clone()))
            })
            .collect()
    }

    /// Resolve a technique to its factory, importing its module on first use
    pub fn resolve(&self, stage: &str, technique: &str) -> Result<Arc<dyn AlgorithmFactory>> {
        let unknown = || KolosalError::UnknownTechnique {
            stage: stage.to_string(),
            technique: technique.to_string(),
        };

        let locator = {
            let entries = self.entries.read();
            match entries.get(stage).and_then(|t| t.get(technique)) {
                None => return Err(unknown()),
                Some(TechniqueReference::Bound(factory)) => return Ok(Arc::clone(factory)),
                Some(TechniqueReference::Deferred(locator)) => locator.clone(),
            }
        };

        let unavailable = |reason: String| KolosalError::TechniqueUnavailable {
            technique: technique.to_string(),
            reason,
        };
        let module = self
            .import(&locator.module)
            .map_err(|e| unavailable(e.to_string()))?;
        let factory = module.symbol(&locator.symbol).ok_or_else(|| {
            unavailable(format!(
                "module '{}' has no symbol '{}'",
                locator.module, locator.symbol
            ))
        })?;

        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(stage)
            .and_then(|t| t.get_mut(technique))
            .ok_or_else(unknown)?;
        match entry {
            // another caller bound it first
            TechniqueReference::Bound(existing) => Ok(Arc::clone(existing)),
            TechniqueReference::Deferred(_) => {
                debug!(stage = %stage, technique = %technique, locator = %locator, "Bound technique");
                *entry = TechniqueReference::Bound(Arc::clone(&factory));
                Ok(factory)
            }
        }
    }

    /// Import a module once; failures are not cached so a later call can retry
    fn import(&self, path: &str) -> Result<Arc<dyn TechniqueModule>> {
        let mut modules = self.modules.lock();
        if let Some(module) = modules.get(path) {
            return Ok(Arc::clone(module));
        }
        debug!(module = %path, "Importing technique module");
        let module = self.loader.import(path)?;
        modules.insert(path.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// Number of modules imported so far
    pub fn imported_modules(&self) -> usize {
        self.modules.lock().len()
    }
}

impl Default for TechniqueRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_entries_start_deferred() {
        let registry = TechniqueRegistry::builtin();
        assert!(registry.contains("scaler", "standard"));
        assert!(!registry.is_bound("scaler", "standard"));
        assert_eq!(registry.imported_modules(), 0);
        assert_eq!(
            registry.techniques("model"),
            vec!["knn".to_string(), "logit".to_string(), "ols".to_string()]
        );
    }

    #[test]
    fn test_resolve_memoizes() {
        let registry = TechniqueRegistry::builtin();
        let first = registry.resolve("scaler", "standard").unwrap();
        assert!(registry.is_bound("scaler", "standard"));
        let second = registry.resolve("scaler", "standard").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // same module, no second import
        registry.resolve("scaler", "minmax").unwrap();
        assert_eq!(registry.imported_modules(), 1);
    }

    #[test]
    fn test_unknown_and_unavailable() {
        let registry = TechniqueRegistry::builtin();
        let err = registry.resolve("model", "forest").unwrap_err();
        assert_eq!(err.kind(), "unknown_technique");

        registry.register_deferred("model", "xgb", TechniqueLocator::new("xgboost", "XGBClassifier"));
        let err = registry.resolve("model", "xgb").unwrap_err();
        assert_eq!(err.kind(), "technique_unavailable");
        assert!(!registry.is_bound("model", "xgb"));
    }

    #[test]
    fn test_remove() {
        let registry = TechniqueRegistry::builtin();
        assert!(registry.remove("model", "knn").is_some());
        assert!(!registry.contains("model", "knn"));
        assert!(registry.remove("model", "knn").is_none());
    }
}
