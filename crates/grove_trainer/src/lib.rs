//! Grove trainer: pipeline-parallel GBDT training engine.
//!
//! The core is the per-level best-split finder: feature passes stream
//! across `overlap` worker streams, each pass sorting its rows by
//! (leaf, value), scanning gradients, and racing split gains into per-leaf
//! argmax cells. The tree driver grows each tree level by level on top of
//! it; the booster loops rounds and label classes.

pub mod booster;
pub mod dataset;
pub mod device;
pub mod errors;
pub mod gain;
pub mod grow;
pub mod level;
pub mod pipeline;

use std::path::Path;

use grove_core::gbdt::Model;
use grove_core::params::{InternalConfig, TreeParam};

pub use booster::train;
pub use dataset::{load_csv, LoadedDataset};
pub use errors::{DeviceError, TrainError};
pub use grow::TreeGrower;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Train a model directly from a CSV file using the provided parameters.
pub fn train_model_from_csv(
    path: &Path,
    params: &TreeParam,
    config: &InternalConfig,
) -> Result<Model, TrainError> {
    let loaded =
        dataset::load_csv(path, true).map_err(|err| TrainError::Dataset(err.to_string()))?;
    booster::train(&loaded.matrix, &loaded.labels, params, config)
}
