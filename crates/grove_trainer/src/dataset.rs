//! CSV dataset loading.
//!
//! Expected format: `feature1,feature2,...,target`, one row per line,
//! `#`-prefixed lines ignored. Columns whose values are all 0 or 1 can be
//! detected as binary set-indicator features and stored sparse.

use anyhow::{Context, Result};
use std::path::Path;

use grove_core::data::DataMatrix;

/// A parsed dataset: the feature matrix plus per-row labels.
pub struct LoadedDataset {
    pub matrix: DataMatrix,
    pub labels: Vec<f32>,
    /// Original CSV column index per matrix feature id (dense columns
    /// first, then sparse).
    pub column_order: Vec<usize>,
}

/// Load a CSV file. With `detect_sparse`, all-binary columns become sparse
/// set-indicator features; dense features keep ids `[0, columns_dense)`.
pub fn load_csv<P: AsRef<Path>>(path: P, detect_sparse: bool) -> Result<LoadedDataset> {
    let content = std::fs::read_to_string(path.as_ref()).context("failed to read CSV file")?;

    let mut columns: Vec<Vec<f32>> = Vec::new();
    let mut labels = Vec::new();

    for (line_idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 2 {
            anyhow::bail!("line {}: expected at least 2 columns", line_idx + 1);
        }
        let feature_count = parts.len() - 1;
        if columns.is_empty() {
            columns = vec![Vec::new(); feature_count];
        } else if columns.len() != feature_count {
            anyhow::bail!(
                "line {}: expected {} features, got {}",
                line_idx + 1,
                columns.len(),
                feature_count
            );
        }
        for (i, part) in parts.iter().take(feature_count).enumerate() {
            let value = part.parse::<f32>().with_context(|| {
                format!("line {}, column {}: invalid number", line_idx + 1, i + 1)
            })?;
            columns[i].push(value);
        }
        let target = parts[feature_count]
            .parse::<f32>()
            .with_context(|| format!("line {}: invalid target", line_idx + 1))?;
        labels.push(target);
    }

    if labels.is_empty() {
        anyhow::bail!("dataset is empty");
    }

    let is_binary =
        |values: &[f32]| detect_sparse && values.iter().all(|&v| v == 0.0 || v == 1.0);

    let mut matrix = DataMatrix::new(labels.len());
    let mut column_order = Vec::with_capacity(columns.len());
    for (i, values) in columns.iter().enumerate() {
        if !is_binary(values) {
            matrix.push_dense_column(values.clone())?;
            column_order.push(i);
        }
    }
    let dense_count = column_order.len();
    for (i, values) in columns.iter().enumerate() {
        if is_binary(values) {
            let rows: Vec<u32> = values
                .iter()
                .enumerate()
                .filter(|(_, &v)| v == 1.0)
                .map(|(row, _)| row as u32)
                .collect();
            matrix.push_sparse_column(rows)?;
            column_order.push(i);
        }
    }
    matrix.init()?;

    tracing::info!(
        rows = matrix.rows(),
        dense = dense_count,
        sparse = matrix.columns_sparse(),
        "dataset loaded"
    );

    Ok(LoadedDataset {
        matrix,
        labels,
        column_order,
    })
}
