//! Grove core: model format, objectives and data layout for the Grove
//! GBDT trainer.
//!
//! The training engine itself lives in `grove-trainer`; this crate holds
//! everything that outlives a training run: the regression-tree heap and
//! ensemble model with canonical serialization, the differentiable
//! objectives, the column-major data matrix, and the parameter bundles.

pub mod data;
pub mod errors;
pub mod gbdt;
pub mod grad;
pub mod objective;
pub mod params;

pub use data::{DataMatrix, DenseColumn, SparseColumn};
pub use errors::{ConfigError, DataError};
pub use gbdt::{Model, ModelError, ModelMeta, RegTree, TreeNode};
pub use grad::{GradPair, GradValue};
pub use objective::{GradHess, Objective, ObjectiveKind};
pub use params::{InternalConfig, TreeParam};

/// Version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
