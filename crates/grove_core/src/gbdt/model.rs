//! Ensemble model with canonical serialization and hashing.
//!
//! Model files are canonical JSON: recursively key-sorted, no whitespace.
//! The blake3 hash of that byte string identifies a model, so identical
//! training runs produce identical hashes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::tree::RegTree;
use crate::data::DataMatrix;
use crate::objective::ObjectiveKind;

/// Model format version.
pub const MODEL_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model validation failed: {0}")]
    ValidationFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("objective error: {0}")]
    Objective(#[from] crate::errors::ConfigError),
}

/// Training provenance carried inside the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMeta {
    pub objective: ObjectiveKind,
    pub labels_count: usize,
    pub rounds: usize,
    pub depth: usize,
    /// Feature count of the training matrix.
    pub columns: usize,
    pub eta: f64,
    /// Base score on the internal scale.
    pub base_score: f64,
    pub seed: u64,
}

/// A trained ensemble.
///
/// Trees are stored round-major: `trees[round * labels_count + class]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    pub version: i32,
    pub meta: ModelMeta,
    pub trees: Vec<RegTree>,
}

impl Model {
    pub fn new(meta: ModelMeta, trees: Vec<RegTree>) -> Self {
        Self {
            version: MODEL_VERSION,
            meta,
            trees,
        }
    }

    /// Validate the ensemble structure.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.version != MODEL_VERSION {
            return Err(ModelError::ValidationFailed(format!(
                "unsupported model version: {}",
                self.version
            )));
        }
        if self.meta.labels_count == 0 {
            return Err(ModelError::ValidationFailed(
                "labels_count must be at least 1".to_string(),
            ));
        }
        if self.trees.len() != self.meta.rounds * self.meta.labels_count {
            return Err(ModelError::ValidationFailed(format!(
                "expected {} trees for {} rounds x {} classes, got {}",
                self.meta.rounds * self.meta.labels_count,
                self.meta.rounds,
                self.meta.labels_count,
                self.trees.len()
            )));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if tree.depth != self.meta.depth {
                return Err(ModelError::ValidationFailed(format!(
                    "tree {} has depth {}, expected {}",
                    i, tree.depth, self.meta.depth
                )));
            }
            tree.validate(self.meta.columns)
                .map_err(|e| ModelError::ValidationFailed(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw internal-scale scores, class-major: `labels_count * rows`.
    pub fn predict_raw(&self, data: &DataMatrix) -> Vec<f32> {
        let n = data.rows();
        let k = self.meta.labels_count;
        let mut scores = vec![self.meta.base_score as f32; k * n];
        for round in 0..self.meta.rounds {
            for class in 0..k {
                let tree = &self.trees[round * k + class];
                let out = &mut scores[class * n..(class + 1) * n];
                for (row, score) in out.iter_mut().enumerate() {
                    *score += tree.predict_row(data, row);
                }
            }
        }
        scores
    }

    /// Output-scale predictions, one per row.
    pub fn predict(&self, data: &DataMatrix) -> Result<Vec<f32>, ModelError> {
        if data.columns() != self.meta.columns {
            return Err(ModelError::ValidationFailed(format!(
                "matrix has {} columns, model was trained on {}",
                data.columns(),
                self.meta.columns
            )));
        }
        let objective = self.meta.objective.build(self.meta.labels_count)?;
        Ok(objective.from_internal(&self.predict_raw(data)))
    }

    /// Serialize to canonical JSON (sorted keys, no whitespace).
    pub fn to_canonical_json(&self) -> Result<String, ModelError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&canonicalize(&value))?)
    }

    /// Blake3 hash of the canonical JSON, as hex.
    pub fn hash_hex(&self) -> Result<String, ModelError> {
        let json = self.to_canonical_json()?;
        let hash = blake3::hash(json.as_bytes());
        Ok(hex::encode(hash.as_bytes()))
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let json = self.to_canonical_json()?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let json = fs::read_to_string(path)?;
        let model: Model = serde_json::from_str(&json)?;
        model.validate()?;
        Ok(model)
    }
}

/// Recursively sort all object keys.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
