//! Integration tests for the technique registry

use kolosal_grid::algorithms::{Algorithm, AlgorithmFactory, FnFactory, Parameters};
use kolosal_grid::error::{KolosalError, Result};
use kolosal_grid::registry::{
    BuiltinModules, ModuleLoader, SymbolTable, TechniqueLocator, TechniqueModule,
    TechniqueRegistry, BUILTIN_CATALOG,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps the built-in loader and counts imports per call
#[derive(Debug, Default)]
struct CountingLoader {
    inner: BuiltinModules,
    imports: AtomicUsize,
}

impl ModuleLoader for CountingLoader {
    fn import(&self, module: &str) -> Result<Arc<dyn TechniqueModule>> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        self.inner.import(module)
    }
}

/// A module that is missing until `installed` is set
#[derive(Debug, Default)]
struct OptionalLoader {
    installed: AtomicBool,
}

impl ModuleLoader for OptionalLoader {
    fn import(&self, module: &str) -> Result<Arc<dyn TechniqueModule>> {
        if !self.installed.load(Ordering::SeqCst) {
            return Err(KolosalError::ConfigError(format!("module '{}' is not installed", module)));
        }
        let factory: Arc<dyn AlgorithmFactory> = Arc::new(FnFactory::new("boost", |_: &Parameters| {
            Err(KolosalError::ModelNotFitted)
        }));
        Ok(Arc::new(SymbolTable::new(module, [("Booster", factory)])))
    }
}

fn counting_registry() -> (Arc<CountingLoader>, TechniqueRegistry) {
    let loader = Arc::new(CountingLoader::default());
    let registry = TechniqueRegistry::new(loader.clone());
    registry.register_catalog(BUILTIN_CATALOG);
    (loader, registry)
}

#[test]
fn test_resolution_is_memoized() {
    let (loader, registry) = counting_registry();

    let first = registry.resolve("model", "logit").unwrap();
    let second = registry.resolve("model", "logit").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loader.imports.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shared_module_imported_once() {
    let (loader, registry) = counting_registry();

    registry.resolve("model", "logit").unwrap();
    registry.resolve("model", "ols").unwrap();
    registry.resolve("scaler", "standard").unwrap();
    registry.resolve("scaler", "robust").unwrap();

    assert_eq!(loader.imports.load(Ordering::SeqCst), 2);
    assert_eq!(registry.imported_modules(), 2);
}

#[test]
fn test_nothing_imported_until_resolved() {
    let (loader, registry) = counting_registry();
    assert_eq!(registry.techniques("scaler").len(), 4);
    assert!(registry.contains("encoder", "onehot"));
    assert_eq!(loader.imports.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_resolution_binds_one_factory() {
    let (loader, registry) = counting_registry();
    let registry = Arc::new(registry);

    let factories: Vec<Arc<dyn AlgorithmFactory>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                scope.spawn(move || registry.resolve("model", "knn").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // every caller ends with the bound factory
    let bound = registry.resolve("model", "knn").unwrap();
    assert!(factories.iter().all(|f| Arc::ptr_eq(f, &bound)));
    assert_eq!(loader.imports.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unavailable_until_installed() {
    let loader = Arc::new(OptionalLoader::default());
    let registry = TechniqueRegistry::new(loader.clone());
    registry.register_deferred("model", "boost", TechniqueLocator::new("boosting", "Booster"));

    let err = registry.resolve("model", "boost").unwrap_err();
    assert!(matches!(err, KolosalError::TechniqueUnavailable { .. }));
    assert!(!registry.is_bound("model", "boost"));

    loader.installed.store(true, Ordering::SeqCst);
    registry.resolve("model", "boost").unwrap();
    assert!(registry.is_bound("model", "boost"));
}

#[test]
fn test_missing_symbol_is_unavailable() {
    let registry = TechniqueRegistry::builtin();
    registry.register_deferred(
        "model",
        "forest",
        TechniqueLocator::new(BuiltinModules::LINEAR_MODELS, "RandomForest"),
    );
    let err = registry.resolve("model", "forest").unwrap_err();
    assert_eq!(err.kind(), "technique_unavailable");
}

#[test]
fn test_unknown_technique_per_stage() {
    let registry = TechniqueRegistry::builtin();
    // known technique, wrong stage
    let err = registry.resolve("scaler", "knn").unwrap_err();
    assert!(matches!(
        err,
        KolosalError::UnknownTechnique { ref stage, ref technique } if stage == "scaler" && technique == "knn"
    ));
}

#[test]
fn test_register_bound_overrides_catalog() {
    let registry = TechniqueRegistry::builtin();
    let factory: Arc<dyn AlgorithmFactory> = Arc::new(FnFactory::new("custom_knn", |_: &Parameters| {
        Err::<Algorithm, _>(KolosalError::ModelNotFitted)
    }));
    registry.register_bound("model", "knn", Arc::clone(&factory));

    let resolved = registry.resolve("model", "knn").unwrap();
    assert!(Arc::ptr_eq(&resolved, &factory));
    assert_eq!(registry.imported_modules(), 0);
}
