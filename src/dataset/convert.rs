//! Frame <-> ndarray conversion for numeric algorithms

use super::ColumnKind;
use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;

fn ensure_numeric(name: &str, dtype: &DataType) -> Result<()> {
    let kind = ColumnKind::from_dtype(dtype);
    if kind.is_numeric() || kind == ColumnKind::Boolean {
        Ok(())
    } else {
        Err(KolosalError::DataError(format!(
            "column '{}' has dtype {} and must be encoded before numeric use",
            name, dtype
        )))
    }
}

/// Convert a numeric series into a dense vector; nulls become 0.0.
/// Labels never reach here with nulls: `Dataset` rejects them.
pub fn series_to_array(series: &Series) -> Result<Array1<f64>> {
    ensure_numeric(series.name(), series.dtype())?;
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

/// Convert every column of a frame into a row-major matrix
pub fn frame_to_array2(df: &DataFrame) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let n_cols = df.width();

    let col_data: Vec<Vec<f64>> = df
        .get_columns()
        .iter()
        .map(|column| {
            let series = column.as_materialized_series();
            series_to_array(series).map(|a| a.to_vec())
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| col_data[c][r]))
}

/// Build a frame from a matrix and column names
pub fn array2_to_frame(x: &Array2<f64>, names: &[String]) -> Result<DataFrame> {
    if x.ncols() != names.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} columns", names.len()),
            actual: format!("{} columns", x.ncols()),
        });
    }

    let columns: Vec<Column> = names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let values: Vec<f64> = x.column(j).to_vec();
            Series::new(name.as_str().into(), values).into_column()
        })
        .collect();

    Ok(DataFrame::new(columns)?)
}
