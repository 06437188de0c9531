//! Column type metadata kept alongside the feature tables

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Semantic type of a feature column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Boolean,
    Float,
    Integer,
    String,
    Categorical,
    List,
    DateTime,
    TimeDelta,
}

impl ColumnKind {
    /// Map a polars dtype onto a column kind
    pub fn from_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean => ColumnKind::Boolean,
            DataType::Float32 | DataType::Float64 => ColumnKind::Float,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => ColumnKind::Integer,
            DataType::Categorical(..) | DataType::Enum(..) => ColumnKind::Categorical,
            DataType::List(..) | DataType::Array(..) => ColumnKind::List,
            DataType::Date | DataType::Datetime(..) | DataType::Time => ColumnKind::DateTime,
            DataType::Duration(..) => ColumnKind::TimeDelta,
            _ => ColumnKind::String,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Float | ColumnKind::Integer)
    }

    /// Encoders target both real categoricals and plain string columns
    pub fn is_categorical(&self) -> bool {
        matches!(self, ColumnKind::Categorical | ColumnKind::String)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "boolean",
            ColumnKind::Float => "float",
            ColumnKind::Integer => "integer",
            ColumnKind::String => "string",
            ColumnKind::Categorical => "categorical",
            ColumnKind::List => "list",
            ColumnKind::DateTime => "datetime",
            ColumnKind::TimeDelta => "timedelta",
        }
    }
}

/// Ordered column name -> kind mapping.
///
/// Order follows the feature table the map was last synced against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMap {
    entries: Vec<(String, ColumnKind)>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infer kinds for every column of a frame
    pub fn infer(df: &DataFrame) -> Self {
        let entries = df
            .get_columns()
            .iter()
            .map(|col| (col.name().to_string(), ColumnKind::from_dtype(col.dtype())))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<ColumnKind> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or overwrite the kind of a column
    pub fn insert(&mut self, name: impl Into<String>, kind: ColumnKind) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = kind,
            None => self.entries.push((name, kind)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ColumnKind> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.entries.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Names of columns whose kind satisfies the predicate
    pub fn names_where(&self, pred: impl Fn(ColumnKind) -> bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, k)| pred(*k))
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn numeric(&self) -> Vec<String> {
        self.names_where(|k| k.is_numeric())
    }

    pub fn categorical(&self) -> Vec<String> {
        self.names_where(|k| k.is_categorical())
    }

    pub fn boolean(&self) -> Vec<String> {
        self.names_where(|k| k == ColumnKind::Boolean)
    }

    /// Reconcile with a frame: drop names the frame lacks, infer kinds for
    /// new names, keep known kinds and adopt the frame's column order.
    ///
    /// Returns the names that were removed.
    pub fn sync_with(&mut self, df: &DataFrame) -> Vec<String> {
        let frame_names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();

        let removed: Vec<String> = self
            .entries
            .iter()
            .filter(|(n, _)| !frame_names.contains(n))
            .map(|(n, _)| n.clone())
            .collect();

        let entries = df
            .get_columns()
            .iter()
            .map(|col| {
                let name = col.name().to_string();
                let kind = self
                    .get(&name)
                    .unwrap_or_else(|| ColumnKind::from_dtype(col.dtype()));
                (name, kind)
            })
            .collect();
        self.entries = entries;

        removed
    }
}
