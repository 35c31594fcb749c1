//! Error types for the training engine.

use thiserror::Error;

use grove_core::errors::{ConfigError, DataError};
use grove_core::gbdt::ModelError;

/// Execution-substrate failures. Fatal; there is no recovery path.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("stream worker terminated unexpectedly")]
    StreamDied,

    #[error("failed to spawn stream worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors surfaced at the trainer boundary.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("dataset error: {0}")]
    Dataset(String),
}
