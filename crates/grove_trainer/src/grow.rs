//! Per-tree growth.
//!
//! Grows one regression tree level by level: seed leaf 0 with the full
//! gradient total, run the level driver, propagate child statistics from
//! the chosen splits, rewrite the row-to-leaf map, and write leaf weights
//! at the last level.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use grove_core::data::DataMatrix;
use grove_core::gbdt::{RegTree, TreeNode};
use grove_core::grad::GradValue;
use grove_core::params::{InternalConfig, TreeParam};

use crate::device::kernels::{self, BLOCK};
use crate::device::{Device, LeafIndex};
use crate::errors::TrainError;
use crate::gain::{leaf_weight, GainParam};
use crate::level::BestSplit;
use crate::pipeline::PipelineSlot;

/// Per-leaf statistics at the current level.
#[derive(Clone, Copy, Debug)]
pub(crate) struct NodeStat<G> {
    pub count: usize,
    pub sum: G,
}

/// Grows trees against a fixed dataset; slots, streams and buffers are
/// allocated once and reused for every tree.
pub struct TreeGrower<K: LeafIndex, G: GradValue> {
    pub(crate) params: TreeParam,
    pub(crate) gain: GainParam,
    pub(crate) device: Device,
    pub(crate) slots: Vec<PipelineSlot<K, G>>,
    pub(crate) rng: StdRng,
    pub(crate) n: usize,
    pub(crate) grad: Arc<Vec<G>>,
    pub(crate) row2leaf: Vec<K>,
    pub(crate) node_stats: Vec<NodeStat<G>>,
    pub(crate) best: Vec<BestSplit<G>>,
    /// Flattened `[sparse_col * leaves + leaf]` true-row counts.
    pub(crate) sparse_stat: Vec<u32>,
}

impl<K: LeafIndex, G: GradValue> TreeGrower<K, G> {
    pub fn new(
        data: &DataMatrix,
        params: TreeParam,
        config: &InternalConfig,
    ) -> Result<Self, TrainError> {
        let n = data.rows();
        let device = Device::init(data);
        let slots = (0..config.overlap)
            .map(|i| PipelineSlot::new(i, n, params.depth))
            .collect::<Result<Vec<_>, _>>()?;
        let gain = GainParam::from_tree(&params);
        Ok(Self {
            params,
            gain,
            device,
            slots,
            rng: StdRng::seed_from_u64(config.seed),
            n,
            grad: Arc::new(Vec::new()),
            row2leaf: Vec::with_capacity(n),
            node_stats: Vec::new(),
            best: Vec::new(),
            sparse_stat: Vec::new(),
        })
    }

    /// Final row-to-leaf assignment of the last grown tree.
    pub fn row_leaves(&self) -> &[K] {
        &self.row2leaf
    }

    /// Grow one tree from a device gradient vector.
    pub fn grow_tree(
        &mut self,
        data: &DataMatrix,
        grad: Arc<Vec<G>>,
    ) -> Result<RegTree, TrainError> {
        debug_assert_eq!(grad.len(), self.n);
        self.grad = grad;
        let depth = self.params.depth;
        let mut tree = RegTree::new(depth);

        // seed level 0: every row in leaf 0, full gradient total
        self.row2leaf.clear();
        self.row2leaf.resize(self.n, K::from_usize(0));
        let total = kernels::blocked_sum(&self.grad);
        self.node_stats.clear();
        self.node_stats.push(NodeStat {
            count: self.n,
            sum: total,
        });
        self.sparse_stat = (0..data.columns_sparse())
            .map(|s| data.sparse(data.columns_dense() + s).rows.len() as u32)
            .collect();

        for level in 0..depth - 1 {
            self.grow_level(data, level)?;

            let leaves = 1usize << level;
            for leaf in 0..leaves {
                let b = &self.best[leaf];
                tree.set_node(
                    level,
                    leaf,
                    TreeNode {
                        fid: b.fid as u32,
                        threshold: b.split_value,
                        split_by_true: b.split_by_true,
                    },
                );
            }

            self.reassign_rows(data);

            if level + 1 < depth - 1 {
                // children inherit (best, parent - best)
                let next: Vec<NodeStat<G>> = (0..leaves)
                    .flat_map(|leaf| {
                        let b = &self.best[leaf];
                        let parent = &self.node_stats[leaf];
                        [
                            NodeStat {
                                count: b.count,
                                sum: b.sum,
                            },
                            NodeStat {
                                count: parent.count - b.count,
                                sum: parent.sum - b.sum,
                            },
                        ]
                    })
                    .collect();
                self.node_stats = next;
                self.rebuild_sparse_stat(data, leaves * 2);
            } else {
                for leaf in 0..leaves {
                    let b = &self.best[leaf];
                    let parent = &self.node_stats[leaf];
                    let left = leaf_weight(b.sum, b.count, &self.gain);
                    let right = leaf_weight(
                        parent.sum - b.sum,
                        parent.count - b.count,
                        &self.gain,
                    );
                    tree.set_leaf_weight(2 * leaf, left as f32);
                    tree.set_leaf_weight(2 * leaf + 1, right as f32);
                }
            }
        }
        Ok(tree)
    }

    /// Route every row to its child leaf under the chosen splits.
    fn reassign_rows(&mut self, data: &DataMatrix) {
        let best = &self.best;
        self.row2leaf
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, leaf)| {
                let current = leaf.to_usize();
                let b = &best[current];
                let left = if b.split_by_true {
                    data.row_has_sparse(row, b.fid as u32)
                } else if b.split_value == f32::INFINITY {
                    true
                } else {
                    data.dense_value(b.fid as usize, row) <= b.split_value
                };
                *leaf = K::from_usize(2 * current + usize::from(!left));
            });
    }

    /// Recount set rows per (sparse column, leaf) by scanning rows once,
    /// with per-chunk tables merged in chunk order.
    fn rebuild_sparse_stat(&mut self, data: &DataMatrix, leaves: usize) {
        let sparse_columns = data.columns_sparse();
        if sparse_columns == 0 {
            self.sparse_stat.clear();
            return;
        }
        let columns_dense = data.columns_dense();
        let tables: Vec<Vec<u32>> = self
            .row2leaf
            .par_chunks(BLOCK)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let mut table = vec![0u32; sparse_columns * leaves];
                for (k, leaf) in chunk.iter().enumerate() {
                    let row = chunk_idx * BLOCK + k;
                    for &fid in data.row_sparse(row) {
                        let sid = fid as usize - columns_dense;
                        table[sid * leaves + leaf.to_usize()] += 1;
                    }
                }
                table
            })
            .collect();

        let mut merged = vec![0u32; sparse_columns * leaves];
        for table in tables {
            for (m, v) in merged.iter_mut().zip(table) {
                *m += v;
            }
        }
        self.sparse_stat = merged;
    }
}
