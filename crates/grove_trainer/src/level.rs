//! Per-level orchestration.
//!
//! For one tree level: materialize the parent prefix arrays, sample the
//! feature subset, keep `overlap` feature passes in flight across the slot
//! ring, and reduce results into the per-leaf best split record in
//! feature-issue order. Leaves with no positive-gain split receive a
//! degenerate pass-through split.

use std::sync::Arc;

use rand::seq::SliceRandom;

use grove_core::data::DataMatrix;
use grove_core::grad::GradValue;

use crate::device::LeafIndex;
use crate::errors::TrainError;
use crate::gain::split_gain;
use crate::grow::TreeGrower;
use crate::pipeline::{issue_feature, DenseResult, LevelCtx};

/// Best split found so far for one leaf.
#[derive(Clone, Copy, Debug)]
pub struct BestSplit<G> {
    /// Feature id; -1 while unset.
    pub fid: i32,
    pub gain: f32,
    /// Dense threshold; `+inf` marks the degenerate pass-through split.
    pub split_value: f32,
    /// Sparse split on set-membership.
    pub split_by_true: bool,
    /// Rows routed left.
    pub count: usize,
    /// Gradient aggregate of the left side.
    pub sum: G,
}

impl<G: GradValue> Default for BestSplit<G> {
    fn default() -> Self {
        Self {
            fid: -1,
            gain: 0.0,
            split_value: f32::INFINITY,
            split_by_true: false,
            count: 0,
            sum: G::zero(),
        }
    }
}

impl<K: LeafIndex, G: GradValue> TreeGrower<K, G> {
    /// Run the split finder for `level` and leave the winning split per
    /// leaf in `self.best`.
    pub(crate) fn grow_level(&mut self, data: &DataMatrix, level: usize) -> Result<(), TrainError> {
        let leaves = 1usize << level;
        debug_assert_eq!(self.node_stats.len(), leaves);

        // parent prefix arrays, identity at index 0
        let mut parent_count = Vec::with_capacity(leaves + 1);
        let mut parent_sum = Vec::with_capacity(leaves + 1);
        parent_count.push(0u32);
        parent_sum.push(G::zero());
        let mut count_acc = 0u32;
        let mut sum_acc = G::zero();
        for stat in &self.node_stats {
            count_acc += stat.count as u32;
            sum_acc += stat.sum;
            parent_count.push(count_acc);
            parent_sum.push(sum_acc);
        }

        // feature subset for this level: a seeded permutation prefix
        let take = self.params.level_sample(data.columns());
        let mut cols: Vec<usize> = (0..data.columns()).collect();
        cols.shuffle(&mut self.rng);
        cols.truncate(take);

        self.best.clear();
        self.best.resize_with(leaves, BestSplit::default);

        let ctx = LevelCtx {
            level,
            leaves,
            rows: self.n,
            row2leaf: Arc::new(self.row2leaf.clone()),
            grad: Arc::clone(&self.grad),
            parent_sum: Arc::new(parent_sum),
            parent_count: Arc::new(parent_count),
            sparse_stat: Arc::new(self.sparse_stat.clone()),
            gain: self.gain,
            columns_dense: data.columns_dense(),
        };

        // keep `overlap` passes in flight; results are consumed strictly in
        // issue order, which the best-split reduction depends on
        let overlap = self.slots.len();
        for j in 0..take {
            if j == 0 {
                for i in 0..overlap.min(take) {
                    issue_feature(&self.slots[i], &self.device, data, &ctx, cols[i]);
                }
            } else if j + overlap - 1 < take {
                let f = j + overlap - 1;
                issue_feature(&self.slots[f % overlap], &self.device, data, &ctx, cols[f]);
            }
            self.slots[j % overlap].stream.sync()?;
            self.consume(&ctx, cols[j], j % overlap);
        }

        // leaves without a usable split route everything left and hand the
        // parent statistics to the left child
        for (leaf, best) in self.best.iter_mut().enumerate() {
            if best.fid < 0 {
                let stat = &self.node_stats[leaf];
                *best = BestSplit {
                    fid: 0,
                    gain: 0.0,
                    split_value: f32::INFINITY,
                    split_by_true: false,
                    count: stat.count,
                    sum: stat.sum,
                };
            }
        }
        Ok(())
    }

    /// Fold one synced slot's results into the per-leaf best splits.
    fn consume(&mut self, ctx: &LevelCtx<K, G>, fid: usize, slot_idx: usize) {
        if fid < ctx.columns_dense {
            let results: Vec<DenseResult<G>> =
                self.slots[slot_idx].buffers.lock().host_dense.clone();
            for (leaf, r) in results.iter().enumerate() {
                if r.gain <= 0.0 || r.gain <= self.best[leaf].gain {
                    continue;
                }
                // a non-finite prefix means the scan overflowed the chosen
                // precision; reject the candidate rather than guess
                if !r.scan.is_finite() {
                    tracing::debug!(fid, leaf, "skipping candidate with non-finite scan prefix");
                    continue;
                }
                self.best[leaf] = BestSplit {
                    fid: fid as i32,
                    gain: r.gain,
                    split_value: 0.5 * (r.fvalue_lo + r.fvalue_hi),
                    split_by_true: false,
                    count: r.index as usize - ctx.parent_count[leaf] as usize,
                    sum: r.scan - ctx.parent_sum[leaf],
                };
            }
        } else {
            let sums: Vec<G> = self.slots[slot_idx].buffers.lock().host_sparse.clone();
            let sid = fid - ctx.columns_dense;
            for (leaf, &sum) in sums.iter().enumerate() {
                let true_count = ctx.sparse_stat[sid * ctx.leaves + leaf] as usize;
                if true_count == 0 {
                    continue;
                }
                let total_count =
                    (ctx.parent_count[leaf + 1] - ctx.parent_count[leaf]) as usize;
                let total_sum = ctx.parent_sum[leaf + 1] - ctx.parent_sum[leaf];
                let gain = split_gain(sum, true_count, total_sum, total_count, &ctx.gain);
                if gain > 0.0 && gain as f32 > self.best[leaf].gain {
                    self.best[leaf] = BestSplit {
                        fid: fid as i32,
                        gain: gain as f32,
                        split_value: 0.0,
                        split_by_true: true,
                        count: true_count,
                        sum,
                    };
                }
            }
        }
    }
}
