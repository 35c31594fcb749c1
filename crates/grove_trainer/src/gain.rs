//! Split gain and leaf weight evaluation.
//!
//! The same functions serve the device kernels and host post-processing,
//! monomorphized over the gradient value type: `q(G) = g^2 / (h + lambda)`
//! with the row count standing in for `h` under gradient-only objectives.

use grove_core::grad::GradValue;
use grove_core::params::TreeParam;

/// Gain-relevant parameters, copied into kernels.
#[derive(Clone, Copy, Debug)]
pub struct GainParam {
    pub min_leaf: usize,
    pub min_hess: f64,
    pub lambda: f64,
    pub alpha: f64,
    pub eta: f64,
}

impl GainParam {
    pub fn from_tree(p: &TreeParam) -> Self {
        Self {
            min_leaf: p.min_leaf_size.max(1),
            min_hess: p.min_child_weight,
            lambda: p.lambda,
            alpha: p.alpha,
            eta: p.eta,
        }
    }
}

/// Regularized quadratic for one side of a split.
fn quad<G: GradValue>(sum: G, count: usize, lambda: f64) -> f64 {
    let g = sum.grad();
    g * g / (sum.hess(count as f64) + lambda)
}

/// Split gain for assigning `left_count` rows with aggregate `left_sum` to
/// the left child out of a segment totalling `(total_sum, total_count)`.
/// Returns 0 when the feasibility predicate fails.
pub fn split_gain<G: GradValue>(
    left_sum: G,
    left_count: usize,
    total_sum: G,
    total_count: usize,
    p: &GainParam,
) -> f64 {
    debug_assert!(left_count <= total_count);
    let right_count = total_count - left_count;
    if left_count < p.min_leaf || right_count < p.min_leaf {
        return 0.0;
    }
    let right_sum = total_sum - left_sum;
    if G::HAS_HESSIAN
        && (left_sum.hess(0.0).abs() < p.min_hess || right_sum.hess(0.0).abs() < p.min_hess)
    {
        return 0.0;
    }
    quad(left_sum, left_count, p.lambda) + quad(right_sum, right_count, p.lambda)
        - quad(total_sum, total_count, p.lambda)
}

/// L1 soft threshold.
fn sign_shrink(g: f64, alpha: f64) -> f64 {
    g.signum() * (g.abs() - alpha).max(0.0)
}

/// Optimal leaf weight `-sign_shrink(G, alpha) / (H + lambda)`, scaled by
/// the learning rate.
pub fn leaf_weight<G: GradValue>(sum: G, count: usize, p: &GainParam) -> f64 {
    let h = sum.hess(count as f64);
    if h + p.lambda == 0.0 {
        return 0.0;
    }
    -(sign_shrink(sum.grad(), p.alpha) / (h + p.lambda)) * p.eta
}
