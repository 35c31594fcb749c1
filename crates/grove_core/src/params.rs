//! Training parameter bundles and their validation.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::objective::ObjectiveKind;

/// Tree growth and regularization knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParam {
    /// Tree depth; `depth - 1` levels carry splits.
    pub depth: usize,
    /// Minimum rows per child for a split to be feasible. Values below 1
    /// are treated as 1: an empty side is never a usable split.
    pub min_leaf_size: usize,
    /// Minimum summed hessian per child.
    pub min_child_weight: f64,
    /// Reserved; participates in neither gain nor weights.
    pub gamma: f64,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// L1 regularization on leaf weights.
    pub alpha: f64,
    /// Learning rate multiplied into leaf weights.
    pub eta: f64,
    /// Fraction of columns sampled per tree, in (0, 1].
    pub colsample_bytree: f64,
    /// Fraction of the tree sample used per level, in (0, 1].
    pub colsample_bylevel: f64,
    /// Base score added to every prediction, in the objective's raw scale.
    pub initial_y: f64,
    /// 1 for regression and binary classification, K for one-vs-all.
    pub labels_count: usize,
    pub objective: ObjectiveKind,
    /// Boosting rounds.
    pub rounds: usize,
}

impl Default for TreeParam {
    fn default() -> Self {
        Self {
            depth: 6,
            min_leaf_size: 1,
            min_child_weight: 1.0,
            gamma: 0.0,
            lambda: 0.0,
            alpha: 0.0,
            eta: 0.3,
            colsample_bytree: 1.0,
            colsample_bylevel: 1.0,
            initial_y: 0.5,
            labels_count: 1,
            objective: ObjectiveKind::LinearRegression,
            rounds: 32,
        }
    }
}

impl TreeParam {
    /// Validate the bundle against a dataset with `columns` features.
    pub fn validate(&self, columns: usize) -> Result<(), ConfigError> {
        if !(2..=64).contains(&self.depth) || self.depth + 1 > 64 {
            return Err(ConfigError::UnsupportedDepth(self.depth));
        }
        for (name, value) in [
            ("colsample_bytree", self.colsample_bytree),
            ("colsample_bylevel", self.colsample_bylevel),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("must lie in (0, 1], got {value}"),
                });
            }
        }
        let bytree = (self.colsample_bytree * columns as f64).floor() as usize;
        if bytree == 0 {
            return Err(ConfigError::SamplingTooSmall {
                selected: bytree,
                columns,
            });
        }
        let bylevel =
            (self.colsample_bytree * self.colsample_bylevel * columns as f64).floor() as usize;
        if bylevel == 0 {
            return Err(ConfigError::SamplingTooSmall {
                selected: bylevel,
                columns,
            });
        }
        if self.labels_count == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "labels_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.labels_count > 1 && self.objective != ObjectiveKind::SoftMaxOneVsAll {
            return Err(ConfigError::InvalidParameter {
                name: "labels_count",
                reason: format!("{} supports a single label class", self.objective),
            });
        }
        if self.rounds == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "rounds",
                reason: "must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("lambda", self.lambda),
            ("alpha", self.alpha),
            ("min_child_weight", self.min_child_weight),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("must be finite and non-negative, got {value}"),
                });
            }
        }
        if !(self.eta > 0.0 && self.eta.is_finite()) {
            return Err(ConfigError::InvalidParameter {
                name: "eta",
                reason: format!("must be finite and positive, got {}", self.eta),
            });
        }
        Ok(())
    }

    /// Number of columns sampled per level.
    pub fn level_sample(&self, columns: usize) -> usize {
        (self.colsample_bytree * self.colsample_bylevel * columns as f64).floor() as usize
    }

    /// Leaf count of a grown tree.
    pub fn leaves(&self) -> usize {
        1 << (self.depth - 1)
    }

    /// Bit width the leaf-id storage must accommodate.
    pub fn leaf_id_bits(&self) -> u32 {
        self.depth as u32 + 1
    }
}

/// Trainer-internal execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalConfig {
    /// Seed for column sampling.
    pub seed: u64,
    /// Pipeline depth: number of feature passes in flight, each on its own
    /// stream.
    pub overlap: usize,
    /// Accumulate gradients in double precision.
    pub double_precision: bool,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            overlap: 2,
            double_precision: false,
        }
    }
}

impl InternalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.overlap == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "overlap",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let p = TreeParam::default();
        assert!(p.validate(10).is_ok());
        assert!(InternalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_depth_bounds() {
        let mut p = TreeParam::default();
        p.depth = 1;
        assert!(matches!(
            p.validate(4),
            Err(ConfigError::UnsupportedDepth(1))
        ));
        p.depth = 64; // depth + 1 exceeds the 64-bit leaf-id budget
        assert!(p.validate(4).is_err());
        p.depth = 63;
        assert!(p.validate(4).is_ok());
    }

    #[test]
    fn test_degenerate_sampling() {
        let mut p = TreeParam::default();
        p.colsample_bytree = 0.05;
        assert!(matches!(
            p.validate(4),
            Err(ConfigError::SamplingTooSmall { .. })
        ));

        let mut p = TreeParam::default();
        p.colsample_bylevel = 0.1;
        // 0.1 * 4 floors to zero
        assert!(p.validate(4).is_err());
        assert!(p.validate(100).is_ok());
    }

    #[test]
    fn test_level_sample_floor() {
        let mut p = TreeParam::default();
        p.colsample_bytree = 0.5;
        p.colsample_bylevel = 0.5;
        assert_eq!(p.level_sample(10), 2);
    }

    #[test]
    fn test_multiclass_requires_softmax() {
        let mut p = TreeParam::default();
        p.labels_count = 3;
        assert!(p.validate(4).is_err());
        p.objective = ObjectiveKind::SoftMaxOneVsAll;
        assert!(p.validate(4).is_ok());
    }

    #[test]
    fn test_zero_overlap_rejected() {
        let mut c = InternalConfig::default();
        c.overlap = 0;
        assert!(c.validate().is_err());
    }
}
