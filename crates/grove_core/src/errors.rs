//! Error types shared across the workspace.

use thiserror::Error;

/// Configuration errors reported at trainer initialization. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported depth {0}: depth must lie in [2, 64] with depth + 1 <= 64")]
    UnsupportedDepth(usize),

    #[error("column sampling too small: {selected} of {columns} columns selected")]
    SamplingTooSmall { selected: usize, columns: usize },

    #[error("unknown objective: {0}")]
    UnknownObjective(String),

    #[error("invalid label at row {row}: {reason}")]
    InvalidLabel { row: usize, reason: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Dataset layout violations reported by [`crate::data::DataMatrix`].
#[derive(Debug, Error)]
pub enum DataError {
    #[error("column length {actual} does not match row count {expected}")]
    ColumnLength { expected: usize, actual: usize },

    #[error("sparse column {column}: row index {row} out of range for {rows} rows")]
    RowOutOfRange {
        column: usize,
        row: u32,
        rows: usize,
    },

    #[error("sparse column {column}: row indices must be strictly ascending")]
    UnsortedSparseRows { column: usize },

    #[error("dense column {column}: non-finite value at row {row}")]
    NonFiniteValue { column: usize, row: usize },

    #[error("matrix has no columns")]
    NoColumns,

    #[error("matrix has no rows")]
    NoRows,

    #[error("matrix is already initialized")]
    AlreadyInitialized,

    #[error("matrix is not initialized")]
    NotInitialized,
}
