//! Differentiable objectives driving the boosting loop.
//!
//! An objective maps raw labels into the internal training scale, refreshes
//! the per-row gradient array between rounds, and maps accumulated internal
//! scores back to the output scale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Raw (gradient, hessian) pair produced for one row and one label class.
/// Gradient-only objectives leave `hess` at zero; the trainer substitutes
/// row counts downstream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GradHess {
    pub grad: f32,
    pub hess: f32,
}

/// The objectives the trainer knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    LinearRegression,
    LogisticRegression,
    SoftMaxOneVsAll,
}

impl ObjectiveKind {
    /// Whether the objective produces a second-order term.
    pub fn has_hessian(&self) -> bool {
        !matches!(self, ObjectiveKind::LinearRegression)
    }

    /// Instantiate the objective for `labels_count` classes.
    pub fn build(&self, labels_count: usize) -> Result<Box<dyn Objective>, ConfigError> {
        match self {
            ObjectiveKind::LinearRegression => Ok(Box::new(LinearRegression)),
            ObjectiveKind::LogisticRegression => Ok(Box::new(LogisticRegression)),
            ObjectiveKind::SoftMaxOneVsAll => {
                if labels_count < 2 {
                    return Err(ConfigError::InvalidParameter {
                        name: "labels_count",
                        reason: format!("softmax requires at least 2 classes, got {labels_count}"),
                    });
                }
                Ok(Box::new(SoftMaxOneVsAll {
                    classes: labels_count,
                }))
            }
        }
    }
}

impl FromStr for ObjectiveKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" | "reg:linear" => Ok(ObjectiveKind::LinearRegression),
            "logistic" | "reg:logistic" => Ok(ObjectiveKind::LogisticRegression),
            "softmax" | "multi:softmax" => Ok(ObjectiveKind::SoftMaxOneVsAll),
            other => Err(ConfigError::UnknownObjective(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectiveKind::LinearRegression => "linear",
            ObjectiveKind::LogisticRegression => "logistic",
            ObjectiveKind::SoftMaxOneVsAll => "softmax",
        };
        f.write_str(name)
    }
}

/// A differentiable training objective.
///
/// `predictions` and `grad` are laid out class-major: element
/// `class * n + row` belongs to `row` under `class`.
pub trait Objective: Send + Sync {
    fn kind(&self) -> ObjectiveKind;

    /// Number of label classes (1 for regression and binary).
    fn labels_count(&self) -> usize {
        1
    }

    /// Map a raw label value into the internal training scale.
    fn into_internal(&self, y: f32) -> f32;

    /// Map accumulated internal scores back to the output scale, one value
    /// per row.
    fn from_internal(&self, scores: &[f32]) -> Vec<f32>;

    /// Validate the label vector once before training.
    fn validate_labels(&self, labels: &[f32]) -> Result<(), ConfigError>;

    /// Refresh the `labels_count * n` gradient array from the current
    /// predictions.
    fn update_grad(&self, grad: &mut [GradHess], labels: &[f32], predictions: &[f32]);
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Squared-error regression. Gradient-only: the hessian of the loss is
/// constant and folds into the row count.
pub struct LinearRegression;

impl Objective for LinearRegression {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::LinearRegression
    }

    fn into_internal(&self, y: f32) -> f32 {
        y
    }

    fn from_internal(&self, scores: &[f32]) -> Vec<f32> {
        scores.to_vec()
    }

    fn validate_labels(&self, labels: &[f32]) -> Result<(), ConfigError> {
        match labels.iter().position(|y| !y.is_finite()) {
            Some(row) => Err(ConfigError::InvalidLabel {
                row,
                reason: "label is not finite".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn update_grad(&self, grad: &mut [GradHess], labels: &[f32], predictions: &[f32]) {
        for ((g, &y), &pred) in grad.iter_mut().zip(labels).zip(predictions) {
            g.grad = pred - y;
            g.hess = 0.0;
        }
    }
}

/// Binary cross-entropy on {0, 1} labels. Internal scale is the logit.
pub struct LogisticRegression;

impl Objective for LogisticRegression {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::LogisticRegression
    }

    fn into_internal(&self, y: f32) -> f32 {
        (y / (1.0 - y)).ln()
    }

    fn from_internal(&self, scores: &[f32]) -> Vec<f32> {
        scores.iter().map(|&s| sigmoid(s)).collect()
    }

    fn validate_labels(&self, labels: &[f32]) -> Result<(), ConfigError> {
        match labels.iter().position(|&y| y != 0.0 && y != 1.0) {
            Some(row) => Err(ConfigError::InvalidLabel {
                row,
                reason: format!("logistic labels must be 0 or 1, got {}", labels[row]),
            }),
            None => Ok(()),
        }
    }

    fn update_grad(&self, grad: &mut [GradHess], labels: &[f32], predictions: &[f32]) {
        for ((g, &y), &pred) in grad.iter_mut().zip(labels).zip(predictions) {
            let p = sigmoid(pred);
            g.grad = p - y;
            g.hess = p * (1.0 - p);
        }
    }
}

/// One-vs-all softmax over `classes` label classes; grows one tree per
/// class per round against the per-class softmax gradient.
pub struct SoftMaxOneVsAll {
    classes: usize,
}

impl Objective for SoftMaxOneVsAll {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::SoftMaxOneVsAll
    }

    fn labels_count(&self) -> usize {
        self.classes
    }

    fn into_internal(&self, y: f32) -> f32 {
        y
    }

    /// Predicted class index per row, by maximum score.
    fn from_internal(&self, scores: &[f32]) -> Vec<f32> {
        let n = scores.len() / self.classes;
        (0..n)
            .map(|row| {
                let mut best = 0usize;
                for class in 1..self.classes {
                    if scores[class * n + row] > scores[best * n + row] {
                        best = class;
                    }
                }
                best as f32
            })
            .collect()
    }

    fn validate_labels(&self, labels: &[f32]) -> Result<(), ConfigError> {
        for (row, &y) in labels.iter().enumerate() {
            if y.fract() != 0.0 || y < 0.0 || y >= self.classes as f32 {
                return Err(ConfigError::InvalidLabel {
                    row,
                    reason: format!("class label must lie in [0, {}), got {y}", self.classes),
                });
            }
        }
        Ok(())
    }

    fn update_grad(&self, grad: &mut [GradHess], labels: &[f32], predictions: &[f32]) {
        let n = labels.len();
        for row in 0..n {
            // softmax over this row's per-class scores, max-shifted
            let mut max = f32::NEG_INFINITY;
            for class in 0..self.classes {
                max = max.max(predictions[class * n + row]);
            }
            let mut denom = 0.0f32;
            for class in 0..self.classes {
                denom += (predictions[class * n + row] - max).exp();
            }
            let label = labels[row] as usize;
            for class in 0..self.classes {
                let p = (predictions[class * n + row] - max).exp() / denom;
                let target = if class == label { 1.0 } else { 0.0 };
                grad[class * n + row] = GradHess {
                    grad: p - target,
                    hess: 2.0 * p * (1.0 - p),
                };
            }
        }
    }
}
