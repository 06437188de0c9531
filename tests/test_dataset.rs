//! Integration tests for the dataset container

use kolosal_grid::config::GridConfig;
use kolosal_grid::dataset::{ColumnKind, DataSplit, Dataset, SplitSettings};
use polars::prelude::*;

fn sample_dataset() -> Dataset {
    let n = 100;
    let df = df!(
        "amount" => (0..n).map(|i| i as f64 * 1.5).collect::<Vec<_>>(),
        "count" => (0..n).map(|i| (i % 9) as i64).collect::<Vec<_>>(),
        "city" => (0..n)
            .map(|i| match i % 10 {
                0 => "rome",
                1..=4 => "oslo",
                _ => "lima",
            })
            .collect::<Vec<_>>(),
        "flag" => (0..n).map(|i| i % 25 == 0).collect::<Vec<_>>(),
        "target" => (0..n).map(|i| if i % 4 == 0 { 1.0 } else { 0.0 }).collect::<Vec<_>>()
    )
    .unwrap();
    Dataset::new(df, "target").unwrap()
}

fn settings(test_size: f64, val_size: f64) -> SplitSettings {
    SplitSettings {
        test_size,
        val_size,
        seed: 11,
    }
}

// ============================================================================
// Construction and metadata
// ============================================================================

#[test]
fn test_label_is_not_a_feature() {
    let dataset = sample_dataset();
    assert!(!dataset.columns().contains("target"));
    assert_eq!(dataset.columns().len(), 4);
    assert_eq!(dataset.columns().get("city"), Some(ColumnKind::String));
    assert_eq!(dataset.columns().get("flag"), Some(ColumnKind::Boolean));
    assert_eq!(dataset.x().unwrap().width(), 4);
    assert_eq!(dataset.y().unwrap().len(), 100);
}

#[test]
fn test_null_labels_are_rejected() {
    let df = df!(
        "a" => [1.0, 2.0, 3.0, 4.0],
        "target" => [Some(1.0), Some(0.0), None, Some(1.0)]
    )
    .unwrap();
    let err = Dataset::new(df, "target").unwrap_err();
    assert_eq!(err.kind(), "data");
    assert!(err.to_string().contains("target"));
}

#[test]
fn test_missing_label_is_rejected() {
    let df = df!("a" => [1.0, 2.0]).unwrap();
    let err = Dataset::new(df, "target").unwrap_err();
    assert_eq!(err.kind(), "feature_not_found");
}

// ============================================================================
// Splitting
// ============================================================================

#[test]
fn test_split_sizes() {
    let mut dataset = sample_dataset();

    // train_test ignores val_size: every non-test row trains
    dataset.split(DataSplit::TrainTest, &settings(0.25, 0.2)).unwrap();
    assert_eq!(dataset.x_test().unwrap().height(), 25);
    assert!(dataset.x_val().is_none());
    assert_eq!(dataset.x_train().unwrap().height(), 75);
    let (x_eval, _) = dataset.evaluation().unwrap();
    assert_eq!(x_eval.height(), 25);

    dataset.split(DataSplit::TrainVal, &settings(0.25, 0.2)).unwrap();
    assert_eq!(dataset.x_train().unwrap().height(), 60);
    let (x_eval, y_eval) = dataset.evaluation().unwrap();
    assert_eq!(x_eval.height(), 15);
    assert_eq!(y_eval.len(), 15);

    dataset.split(DataSplit::Full, &settings(0.25, 0.2)).unwrap();
    let (x_train, _) = dataset.training().unwrap();
    let (x_eval, _) = dataset.evaluation().unwrap();
    assert_eq!(x_train.height(), 100);
    assert_eq!(x_eval.height(), 100);
}

#[test]
fn test_default_config_trains_on_every_non_test_row() {
    let mut dataset = sample_dataset();
    let split = GridConfig::new().split_settings();
    dataset.split(DataSplit::TrainTest, &split).unwrap();

    let train = dataset.x_train().unwrap().height();
    let test = dataset.x_test().unwrap().height();
    assert_eq!(train + test, 100);
    assert_eq!(test, 33);
}

#[test]
fn test_train_val_requires_val_size() {
    let mut dataset = sample_dataset();
    let err = dataset
        .split(DataSplit::TrainVal, &settings(0.25, 0.0))
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_unsplit_dataset_has_no_training_view() {
    let dataset = sample_dataset();
    assert!(dataset.training().is_err());
    assert!(dataset.evaluation().is_err());
    assert_eq!(dataset.evaluation_split(), None);
}

// ============================================================================
// Feature mutation
// ============================================================================

#[test]
fn test_map_features_updates_every_view() {
    let mut dataset = sample_dataset();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();

    dataset
        .map_features(|df| Ok(df.drop("city")?))
        .unwrap();

    for view in [dataset.x(), dataset.x_train(), dataset.x_test()] {
        assert!(view.unwrap().column("city").is_err());
    }
    assert!(!dataset.columns().contains("city"));
    assert_eq!(dataset.dropped_columns(), &["city".to_string()]);
}

#[test]
fn test_map_features_rejects_row_changes() {
    let mut dataset = sample_dataset();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();
    let train_rows = dataset.x_train().unwrap().height();

    let err = dataset.map_features(|df| Ok(df.head(Some(3)))).unwrap_err();
    assert_eq!(err.kind(), "shape");
    assert_eq!(dataset.x_train().unwrap().height(), train_rows);
}

#[test]
fn test_map_features_reinfers_changed_dtype() {
    let mut dataset = sample_dataset();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();

    dataset
        .map_features(|df| {
            let mut out = df.clone();
            let cast = out.column("count")?.cast(&DataType::Float64)?;
            out.with_column(cast)?;
            Ok(out)
        })
        .unwrap();
    assert_eq!(dataset.columns().get("count"), Some(ColumnKind::Float));
}

#[test]
fn test_set_training_checks_label_length() {
    let mut dataset = sample_dataset();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();
    let x = dataset.x_train().unwrap().head(Some(10));
    let y = dataset.y_train().unwrap().head(Some(9));

    let err = dataset.set_training(x.clone(), y).unwrap_err();
    assert_eq!(err.kind(), "shape");

    let y = dataset.y_train().unwrap().head(Some(10));
    dataset.set_training(x, y).unwrap();
    assert_eq!(dataset.training().unwrap().0.height(), 10);
}

#[test]
fn test_drop_columns_logs_once() {
    let mut dataset = sample_dataset();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();

    dataset.drop_columns(&["flag".to_string()]).unwrap();
    dataset.reset_features().unwrap();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();
    dataset.drop_columns(&["flag".to_string()]).unwrap();

    assert_eq!(dataset.dropped_columns(), &["flag".to_string()]);
}

#[test]
fn test_reset_restores_source_state() {
    let mut dataset = sample_dataset();
    dataset.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();
    dataset.drop_columns(&["amount".to_string()]).unwrap();

    dataset.reset_features().unwrap();
    assert_eq!(dataset.x().unwrap().width(), 4);
    assert!(dataset.columns().contains("amount"));
    assert!(dataset.x_train().is_none());
    assert!(dataset.predictions().is_none());
}

#[test]
fn test_clones_are_isolated() {
    let mut original = sample_dataset();
    let mut copy = original.clone();

    copy.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();
    copy.drop_columns(&["city".to_string()]).unwrap();

    assert!(original.x_train().is_none());
    assert!(original.columns().contains("city"));
    assert!(original.dropped_columns().is_empty());
    original.split(DataSplit::TrainTest, &settings(0.3, 0.0)).unwrap();
    assert_eq!(original.x_train().unwrap().width(), 4);
}

// ============================================================================
// Source preparation
// ============================================================================

#[test]
fn test_convert_rare_categories() {
    let mut dataset = sample_dataset();
    dataset.convert_rare(&["city".to_string()], 0.15).unwrap();

    let city = dataset.x().unwrap().column("city").unwrap().clone();
    let values: Vec<Option<&str>> = city.str().unwrap().into_iter().collect();
    assert_eq!(values[0], Some(""));
    assert_eq!(values[1], Some("oslo"));
    assert_eq!(values[5], Some("lima"));
}

#[test]
fn test_drop_infrequent_booleans() {
    let mut dataset = sample_dataset();
    let dropped = dataset.drop_infrequent(&["flag".to_string()], 0.1).unwrap();

    assert_eq!(dropped, vec!["flag".to_string()]);
    assert!(!dataset.columns().contains("flag"));
    assert!(dataset.dropped_columns().contains(&"flag".to_string()));
    assert!(dataset.source().column("flag").is_err());
}

#[test]
fn test_cannot_drop_label() {
    let mut dataset = sample_dataset();
    let err = dataset
        .drop_source_columns(&["target".to_string()])
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_change_column_kind() {
    let mut dataset = sample_dataset();
    dataset
        .change_column_kind(&["count".to_string()], ColumnKind::Categorical)
        .unwrap();
    assert!(dataset.columns().categorical().contains(&"count".to_string()));

    let err = dataset
        .change_column_kind(&["missing".to_string()], ColumnKind::Float)
        .unwrap_err();
    assert_eq!(err.kind(), "feature_not_found");
}

#[test]
fn test_class_imbalance_ratio() {
    let dataset = sample_dataset();
    // 25 positives out of 100
    assert_eq!(dataset.class_imbalance_ratio(), Some(3.0));

    let df = df!("a" => [1.0, 2.0], "target" => [0.0, 0.0]).unwrap();
    let dataset = Dataset::new(df, "target").unwrap();
    assert_eq!(dataset.class_imbalance_ratio(), None);
}
