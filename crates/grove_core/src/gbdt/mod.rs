//! Tree and ensemble model format.

pub mod model;
pub mod tree;

pub use model::{Model, ModelError, ModelMeta, MODEL_VERSION};
pub use tree::{RegTree, TreeNode};
