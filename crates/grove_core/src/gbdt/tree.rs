//! Regression tree heap produced by the trainer.
//!
//! A tree of depth `d` is a perfect binary heap: internal nodes occupy
//! levels `0..d-1`, leaf weights live at level `d-1`. Unset nodes carry an
//! infinite threshold and route every row left, so the heap never needs a
//! leaf-only node variant.

use serde::{Deserialize, Serialize};

use crate::data::DataMatrix;

/// One internal node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    /// Feature id; 0 with an infinite threshold marks a pass-through node.
    pub fid: u32,
    /// Dense split threshold; `+inf` routes every row left.
    #[serde(with = "threshold_serde")]
    pub threshold: f32,
    /// Sparse split: the left side is "row has the feature".
    pub split_by_true: bool,
}

/// JSON has no infinities, and pass-through nodes carry `+inf` thresholds;
/// non-finite values round-trip as strings.
mod threshold_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(serde::Serialize, serde::Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(f32),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f32(*value)
        } else if *value == f32::INFINITY {
            serializer.serialize_str("inf")
        } else if *value == f32::NEG_INFINITY {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_str("nan")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Num(v) => Ok(v),
            Repr::Text(s) => match s.as_str() {
                "inf" => Ok(f32::INFINITY),
                "-inf" => Ok(f32::NEG_INFINITY),
                "nan" => Ok(f32::NAN),
                other => Err(serde::de::Error::custom(format!(
                    "invalid threshold: {other}"
                ))),
            },
        }
    }
}

impl TreeNode {
    /// The pass-through node written for leaves with no usable split.
    pub fn pass_through() -> Self {
        Self {
            fid: 0,
            threshold: f32::INFINITY,
            split_by_true: false,
        }
    }
}

/// A regression tree of fixed depth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegTree {
    pub depth: usize,
    /// Internal nodes in heap order; length `2^(depth-1) - 1`.
    pub nodes: Vec<TreeNode>,
    /// Weights of the `2^(depth-1)` leaves at the last level.
    pub leaf_weights: Vec<f32>,
}

impl RegTree {
    pub fn new(depth: usize) -> Self {
        let leaves = 1usize << (depth - 1);
        Self {
            depth,
            nodes: vec![TreeNode::pass_through(); leaves - 1],
            leaf_weights: vec![0.0; leaves],
        }
    }

    /// Heap index of the first node at `level`.
    pub fn heap_offset(level: usize) -> usize {
        (1 << level) - 1
    }

    /// Heap index of a node's child.
    pub fn child_node(heap_index: usize, is_left: bool) -> usize {
        2 * heap_index + if is_left { 1 } else { 2 }
    }

    /// Node `k` within `level`.
    pub fn node(&self, level: usize, k: usize) -> &TreeNode {
        &self.nodes[Self::heap_offset(level) + k]
    }

    pub fn set_node(&mut self, level: usize, k: usize, node: TreeNode) {
        self.nodes[Self::heap_offset(level) + k] = node;
    }

    pub fn leaf_weight(&self, leaf: usize) -> f32 {
        self.leaf_weights[leaf]
    }

    pub fn set_leaf_weight(&mut self, leaf: usize, weight: f32) {
        self.leaf_weights[leaf] = weight;
    }

    fn goes_left(node: &TreeNode, data: &DataMatrix, row: usize) -> bool {
        if node.split_by_true {
            return data.row_has_sparse(row, node.fid);
        }
        // pass-through nodes route left before touching dense storage, so
        // the convention holds on datasets with no dense columns
        if node.threshold == f32::INFINITY {
            return true;
        }
        data.dense_value(node.fid as usize, row) <= node.threshold
    }

    /// Walk the heap for one row and return its leaf weight.
    pub fn predict_row(&self, data: &DataMatrix, row: usize) -> f32 {
        let mut k = 0usize;
        for level in 0..self.depth - 1 {
            let node = self.node(level, k);
            let left = Self::goes_left(node, data, row);
            k = 2 * k + usize::from(!left);
        }
        self.leaf_weights[k]
    }

    /// Structural validation against the declared depth.
    pub fn validate(&self, columns: usize) -> Result<(), String> {
        if self.depth < 2 {
            return Err(format!("tree depth {} below minimum of 2", self.depth));
        }
        let leaves = 1usize << (self.depth - 1);
        if self.nodes.len() != leaves - 1 {
            return Err(format!(
                "expected {} internal nodes for depth {}, got {}",
                leaves - 1,
                self.depth,
                self.nodes.len()
            ));
        }
        if self.leaf_weights.len() != leaves {
            return Err(format!(
                "expected {} leaf weights for depth {}, got {}",
                leaves,
                self.depth,
                self.leaf_weights.len()
            ));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.fid as usize >= columns {
                return Err(format!(
                    "node {} references feature {} of {}",
                    i, node.fid, columns
                ));
            }
            if node.threshold.is_nan() {
                return Err(format!("node {i} has NaN threshold"));
            }
        }
        if let Some(i) = self.leaf_weights.iter().position(|w| !w.is_finite()) {
            return Err(format!("leaf {i} has non-finite weight"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> DataMatrix {
        let mut m = DataMatrix::new(4);
        m.push_dense_column(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        m.push_sparse_column(vec![0, 3]).unwrap();
        m.init().unwrap();
        m
    }

    #[test]
    fn test_heap_offsets() {
        assert_eq!(RegTree::heap_offset(0), 0);
        assert_eq!(RegTree::heap_offset(1), 1);
        assert_eq!(RegTree::heap_offset(2), 3);
        assert_eq!(RegTree::child_node(0, true), 1);
        assert_eq!(RegTree::child_node(0, false), 2);
        assert_eq!(RegTree::child_node(2, true), 5);
    }

    #[test]
    fn test_dense_routing() {
        let data = matrix();
        let mut tree = RegTree::new(2);
        tree.set_node(
            0,
            0,
            TreeNode {
                fid: 0,
                threshold: 2.5,
                split_by_true: false,
            },
        );
        tree.set_leaf_weight(0, -1.0);
        tree.set_leaf_weight(1, 1.0);

        assert_eq!(tree.predict_row(&data, 0), -1.0);
        assert_eq!(tree.predict_row(&data, 1), -1.0);
        assert_eq!(tree.predict_row(&data, 2), 1.0);
        assert_eq!(tree.predict_row(&data, 3), 1.0);
    }

    #[test]
    fn test_sparse_routing() {
        let data = matrix();
        let mut tree = RegTree::new(2);
        tree.set_node(
            0,
            0,
            TreeNode {
                fid: 1,
                threshold: 0.0,
                split_by_true: true,
            },
        );
        tree.set_leaf_weight(0, 5.0);
        tree.set_leaf_weight(1, -5.0);

        // rows 0 and 3 carry the feature and go left
        assert_eq!(tree.predict_row(&data, 0), 5.0);
        assert_eq!(tree.predict_row(&data, 1), -5.0);
        assert_eq!(tree.predict_row(&data, 2), -5.0);
        assert_eq!(tree.predict_row(&data, 3), 5.0);
    }

    #[test]
    fn test_pass_through_routes_left() {
        let data = matrix();
        let mut tree = RegTree::new(3);
        tree.set_node(
            0,
            0,
            TreeNode {
                fid: 0,
                threshold: 2.5,
                split_by_true: false,
            },
        );
        // level 1 stays pass-through; every row lands on an even leaf
        tree.set_leaf_weight(0, 1.0);
        tree.set_leaf_weight(2, 2.0);

        assert_eq!(tree.predict_row(&data, 0), 1.0);
        assert_eq!(tree.predict_row(&data, 3), 2.0);
    }

    #[test]
    fn test_validate_shape() {
        let tree = RegTree::new(3);
        assert!(tree.validate(1).is_ok());

        let mut bad = RegTree::new(3);
        bad.nodes.pop();
        assert!(bad.validate(1).is_err());

        let mut bad = RegTree::new(3);
        bad.set_leaf_weight(1, f32::NAN);
        assert!(bad.validate(1).is_err());
    }
}
