//! Module loading for deferred techniques
//!
//! A [`ModuleLoader`] turns a module path into a [`TechniqueModule`], a table
//! of named factories. Building a module's table is the expensive step the
//! registry defers until a configuration actually selects one of its
//! techniques.

use crate::algorithms::{encoder, knn, linear_models, sampler, scaler, selector, AlgorithmFactory};
use crate::error::{KolosalError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An imported module: symbol name -> factory
pub trait TechniqueModule: Send + Sync + fmt::Debug {
    fn path(&self) -> &str;
    fn symbol(&self, name: &str) -> Option<Arc<dyn AlgorithmFactory>>;
    fn symbols(&self) -> Vec<String>;
}

/// Imports modules by path
pub trait ModuleLoader: Send + Sync + fmt::Debug {
    fn import(&self, module: &str) -> Result<Arc<dyn TechniqueModule>>;
}

/// Module backed by an in-memory symbol table
#[derive(Debug, Clone)]
pub struct SymbolTable {
    path: String,
    symbols: BTreeMap<String, Arc<dyn AlgorithmFactory>>,
}

impl SymbolTable {
    pub fn new<S: Into<String>>(
        path: impl Into<String>,
        symbols: impl IntoIterator<Item = (S, Arc<dyn AlgorithmFactory>)>,
    ) -> Self {
        Self {
            path: path.into(),
            symbols: symbols.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl TechniqueModule for SymbolTable {
    fn path(&self) -> &str {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<Arc<dyn AlgorithmFactory>> {
        self.symbols.get(name).cloned()
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }
}

/// Builds the symbol list of one module
pub type ModuleBuilder = fn() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)>;

/// Loader for the crate's algorithm modules, extensible with more builders
#[derive(Clone)]
pub struct BuiltinModules {
    modules: BTreeMap<String, ModuleBuilder>,
}

impl BuiltinModules {
    pub const SCALER: &'static str = "kolosal_grid::algorithms::scaler";
    pub const ENCODER: &'static str = "kolosal_grid::algorithms::encoder";
    pub const SAMPLER: &'static str = "kolosal_grid::algorithms::sampler";
    pub const SELECTOR: &'static str = "kolosal_grid::algorithms::selector";
    pub const LINEAR_MODELS: &'static str = "kolosal_grid::algorithms::linear_models";
    pub const KNN: &'static str = "kolosal_grid::algorithms::knn";

    pub fn new() -> Self {
        let builtins: [(&str, ModuleBuilder); 6] = [
            (Self::SCALER, scaler::symbols),
            (Self::ENCODER, encoder::symbols),
            (Self::SAMPLER, sampler::symbols),
            (Self::SELECTOR, selector::symbols),
            (Self::LINEAR_MODELS, linear_models::symbols),
            (Self::KNN, knn::symbols),
        ];
        Self {
            modules: builtins
                .into_iter()
                .map(|(path, builder)| (path.to_string(), builder))
                .collect(),
        }
    }

    /// Make another module importable
    pub fn with_module(mut self, path: impl Into<String>, builder: ModuleBuilder) -> Self {
        self.modules.insert(path.into(), builder);
        self
    }

    pub fn module_paths(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

impl Default for BuiltinModules {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BuiltinModules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinModules")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleLoader for BuiltinModules {
    fn import(&self, module: &str) -> Result<Arc<dyn TechniqueModule>> {
        let builder = self
            .modules
            .get(module)
            .ok_or_else(|| KolosalError::ConfigError(format!("no module named '{}'", module)))?;
        Ok(Arc::new(SymbolTable::new(module, builder())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_import() {
        let loader = BuiltinModules::new();
        let module = loader.import(BuiltinModules::SCALER).unwrap();
        assert_eq!(module.path(), BuiltinModules::SCALER);
        assert!(module.symbol("StandardScaler").is_some());
        assert!(module.symbol("Missing").is_none());
    }

    #[test]
    fn test_unknown_module() {
        let loader = BuiltinModules::new();
        assert!(loader.import("xgboost").is_err());
    }
}
