//! Boosting outer loop.
//!
//! Validates the configuration, selects the engine instantiation for the
//! requested depth, objective and precision, then per round: refresh
//! gradients from the objective, grow one tree per label class, and fold
//! each tree's leaf weights into the running predictions.

use grove_core::data::DataMatrix;
use grove_core::errors::{ConfigError, DataError};
use grove_core::gbdt::{Model, ModelMeta};
use grove_core::grad::{GradPair, GradValue};
use grove_core::objective::{GradHess, Objective};
use grove_core::params::{InternalConfig, TreeParam};

use crate::device::{upload_grad, LeafIndex};
use crate::errors::TrainError;
use crate::grow::TreeGrower;

/// Train an ensemble on `data` against per-row `labels`.
pub fn train(
    data: &DataMatrix,
    labels: &[f32],
    params: &TreeParam,
    config: &InternalConfig,
) -> Result<Model, TrainError> {
    if !data.is_initialized() {
        return Err(TrainError::Data(DataError::NotInitialized));
    }
    params.validate(data.columns())?;
    config.validate()?;
    if labels.len() != data.rows() {
        return Err(TrainError::Config(ConfigError::InvalidParameter {
            name: "labels",
            reason: format!("{} labels for {} rows", labels.len(), data.rows()),
        }));
    }
    let objective = params.objective.build(params.labels_count)?;
    objective.validate_labels(labels)?;
    let base = objective.into_internal(params.initial_y as f32);
    if !base.is_finite() {
        return Err(TrainError::Config(ConfigError::InvalidParameter {
            name: "initial_y",
            reason: format!(
                "{} maps to a non-finite base score under {}",
                params.initial_y, params.objective
            ),
        }));
    }

    tracing::info!(
        rows = data.rows(),
        columns = data.columns(),
        objective = %params.objective,
        depth = params.depth,
        rounds = params.rounds,
        overlap = config.overlap,
        double_precision = config.double_precision,
        "training"
    );

    // the engine is monomorphized over the narrowest leaf-id type fitting
    // depth + 1 bits, the gradient arity and the accumulator precision
    macro_rules! run {
        ($K:ty) => {
            match (params.objective.has_hessian(), config.double_precision) {
                (false, false) => {
                    train_typed::<$K, f32>(data, labels, objective.as_ref(), base, params, config)
                }
                (false, true) => {
                    train_typed::<$K, f64>(data, labels, objective.as_ref(), base, params, config)
                }
                (true, false) => train_typed::<$K, GradPair<f32>>(
                    data,
                    labels,
                    objective.as_ref(),
                    base,
                    params,
                    config,
                ),
                (true, true) => train_typed::<$K, GradPair<f64>>(
                    data,
                    labels,
                    objective.as_ref(),
                    base,
                    params,
                    config,
                ),
            }
        };
    }
    match params.leaf_id_bits() {
        0..=8 => run!(u8),
        9..=16 => run!(u16),
        17..=32 => run!(u32),
        _ => run!(u64),
    }
}

fn train_typed<K: LeafIndex, G: GradValue>(
    data: &DataMatrix,
    labels: &[f32],
    objective: &dyn Objective,
    base: f32,
    params: &TreeParam,
    config: &InternalConfig,
) -> Result<Model, TrainError> {
    let n = data.rows();
    let classes = params.labels_count;
    let mut predictions = vec![base; classes * n];
    let mut grad = vec![GradHess::default(); classes * n];
    let mut grower = TreeGrower::<K, G>::new(data, params.clone(), config)?;
    let mut trees = Vec::with_capacity(params.rounds * classes);

    for round in 0..params.rounds {
        objective.update_grad(&mut grad, labels, &predictions);
        for class in 0..classes {
            let slice = &grad[class * n..(class + 1) * n];
            let tree = grower.grow_tree(data, upload_grad::<G>(slice))?;

            let scores = &mut predictions[class * n..(class + 1) * n];
            for (row, leaf) in grower.row_leaves().iter().enumerate() {
                scores[row] += tree.leaf_weight(leaf.to_usize());
            }
            trees.push(tree);
        }
        tracing::info!(round = round + 1, total = params.rounds, "boosting round");
    }

    let model = Model::new(
        ModelMeta {
            objective: params.objective,
            labels_count: classes,
            rounds: params.rounds,
            depth: params.depth,
            columns: data.columns(),
            eta: params.eta,
            base_score: f64::from(base),
            seed: config.seed,
        },
        trees,
    );
    model.validate()?;
    Ok(model)
}
