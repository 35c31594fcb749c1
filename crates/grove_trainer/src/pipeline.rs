//! Per-feature split-finding pipeline.
//!
//! Each pipeline slot owns a stream, a set of device buffers sized to the
//! row count, per-leaf argmax cells and a scratch arena. A feature pass
//! queues its stages onto the slot's stream and returns immediately; the
//! level driver syncs the slot just before consuming its host-visible
//! results. Buffers are slot-private, so concurrent slots never share
//! mutable state.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::Mutex;

use grove_core::data::DataMatrix;
use grove_core::grad::GradValue;

use crate::device::arena::{self, DeviceArena};
use crate::device::argmax::ArgMaxCell;
use crate::device::kernels::{self, BLOCK};
use crate::device::stream::Stream;
use crate::device::{Device, LeafIndex};
use crate::errors::DeviceError;
use crate::gain::GainParam;

/// Host-visible dense-pass result for one leaf, filled by the copy-out
/// stage. `gain == 0` means no positive-gain candidate was found.
#[derive(Clone, Copy, Debug)]
pub struct DenseResult<G> {
    pub gain: f32,
    /// Winning sort position.
    pub index: u32,
    /// Global scan prefix at the winning position.
    pub scan: G,
    /// Feature values on either side of the winning position.
    pub fvalue_lo: f32,
    pub fvalue_hi: f32,
}

impl<G: GradValue> Default for DenseResult<G> {
    fn default() -> Self {
        Self {
            gain: 0.0,
            index: 0,
            scan: G::zero(),
            fvalue_lo: 0.0,
            fvalue_hi: 0.0,
        }
    }
}

/// Slot-private device buffers.
pub(crate) struct SlotBuffers<K, G> {
    /// Leaf id per sort position.
    segments: Vec<K>,
    /// Row id per sort position.
    positions: Vec<u32>,
    grad_sorted: Vec<G>,
    /// Permuted feature values; index 0 holds the `-inf` sentinel.
    fvalue: Vec<f32>,
    scan: Vec<G>,
    /// Scan block partials. Gradient pairs are not POD-castable, so this
    /// scratch is typed rather than carved from the arena.
    block_sums: Vec<G>,
    sparse_offsets: Vec<usize>,
    sparse_sums: Vec<G>,
    arena: DeviceArena,
    /// Device copy of the slot's current column.
    values: Arc<Vec<f32>>,
    index: Arc<Vec<u32>>,
    sparse_rows: Arc<Vec<u32>>,
    /// Host mirrors, written by the copy-out stage.
    pub(crate) host_dense: Vec<DenseResult<G>>,
    pub(crate) host_sparse: Vec<G>,
}

impl<K: LeafIndex, G: GradValue> SlotBuffers<K, G> {
    fn with_capacity(n: usize) -> Self {
        Self {
            segments: Vec::with_capacity(n),
            positions: Vec::with_capacity(n),
            grad_sorted: Vec::with_capacity(n),
            fvalue: Vec::with_capacity(n + 1),
            scan: Vec::with_capacity(n),
            block_sums: Vec::new(),
            sparse_offsets: Vec::new(),
            sparse_sums: Vec::new(),
            arena: DeviceArena::new(),
            values: Arc::new(Vec::new()),
            index: Arc::new(Vec::new()),
            sparse_rows: Arc::new(Vec::new()),
            host_dense: Vec::new(),
            host_sparse: Vec::new(),
        }
    }
}

/// One of `overlap` pipeline slots.
pub struct PipelineSlot<K: LeafIndex, G: GradValue> {
    pub(crate) stream: Stream,
    pub(crate) cells: Arc<Vec<ArgMaxCell>>,
    pub(crate) buffers: Arc<Mutex<SlotBuffers<K, G>>>,
    /// Feature currently held in the slot's column cache.
    cached_fid: Cell<Option<usize>>,
}

impl<K: LeafIndex, G: GradValue> PipelineSlot<K, G> {
    pub fn new(slot_id: usize, rows: usize, depth: usize) -> Result<Self, DeviceError> {
        // cells cover the deepest splitting level
        let max_leaves = 1usize << (depth - 2);
        Ok(Self {
            stream: Stream::spawn(format!("grove-slot-{slot_id}"))?,
            cells: Arc::new((0..max_leaves).map(|_| ArgMaxCell::new()).collect()),
            buffers: Arc::new(Mutex::new(SlotBuffers::with_capacity(rows))),
            cached_fid: Cell::new(None),
        })
    }
}

/// Per-level inputs shared by every feature pass of the level.
#[derive(Clone)]
pub(crate) struct LevelCtx<K, G> {
    pub level: usize,
    pub leaves: usize,
    pub rows: usize,
    pub row2leaf: Arc<Vec<K>>,
    pub grad: Arc<Vec<G>>,
    pub parent_sum: Arc<Vec<G>>,
    pub parent_count: Arc<Vec<u32>>,
    /// Flattened `[sparse_col * leaves + leaf]` true-row counts.
    pub sparse_stat: Arc<Vec<u32>>,
    pub gain: GainParam,
    pub columns_dense: usize,
}

/// Queue a full feature pass on the slot's stream.
pub(crate) fn issue_feature<K: LeafIndex, G: GradValue>(
    slot: &PipelineSlot<K, G>,
    device: &Device,
    data: &DataMatrix,
    ctx: &LevelCtx<K, G>,
    fid: usize,
) {
    if fid < ctx.columns_dense {
        issue_dense(slot, device, data, ctx, fid);
    } else {
        issue_sparse(slot, device, data, ctx, fid);
    }
}

fn issue_dense<K: LeafIndex, G: GradValue>(
    slot: &PipelineSlot<K, G>,
    device: &Device,
    data: &DataMatrix,
    ctx: &LevelCtx<K, G>,
    fid: usize,
) {
    let n = ctx.rows;
    let leaves = ctx.leaves;
    tracing::debug!(fid, level = ctx.level, "issuing dense feature pass");

    // zero the result cells
    {
        let cells = Arc::clone(&slot.cells);
        slot.stream.run(move || {
            for cell in cells.iter().take(leaves) {
                cell.reset();
            }
        });
    }

    // column upload, or reuse of the slot's cached copy
    if slot.cached_fid.get() != Some(fid) {
        let buffers = Arc::clone(&slot.buffers);
        match device.dense_resident(fid) {
            Some((values, index)) => slot.stream.run(move || {
                let mut b = buffers.lock();
                b.values = values;
                b.index = index;
            }),
            None => {
                let host_values = Arc::clone(&data.dense(fid).values);
                let host_index = Arc::clone(&data.dense(fid).sorted_index);
                slot.stream.run(move || {
                    let mut b = buffers.lock();
                    b.values = Arc::new(host_values.as_ref().clone());
                    b.index = Arc::new(host_index.as_ref().clone());
                });
            }
        }
        slot.cached_fid.set(Some(fid));
    }

    // leaf ids into feature order
    {
        let buffers = Arc::clone(&slot.buffers);
        let row2leaf = Arc::clone(&ctx.row2leaf);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let b = &mut *guard;
            b.segments.resize(n, K::default());
            let index = Arc::clone(&b.index);
            kernels::gather(&row2leaf, &index, &mut b.segments);
        });
    }

    // stable sort of (leaf id, row id) over the low level+1 bits
    {
        let buffers = Arc::clone(&slot.buffers);
        let bits = ctx.level as u32 + 1;
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                segments,
                positions,
                arena,
                index,
                ..
            } = &mut *guard;
            positions.clear();
            positions.extend_from_slice(index.as_slice());
            let scratch = arena.request(arena::pair_bytes::<K, u32>(n, n));
            let (tmp_keys, tmp_values) = arena::typed_pair::<K, u32>(scratch, n, n);
            kernels::radix_sort_pairs(segments, positions, tmp_keys, tmp_values, bits);
        });
    }

    // gradients into sorted order
    {
        let buffers = Arc::clone(&slot.buffers);
        let grad = Arc::clone(&ctx.grad);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                positions,
                grad_sorted,
                ..
            } = &mut *guard;
            grad_sorted.resize(n, G::zero());
            kernels::gather(&grad, positions, grad_sorted);
        });
    }

    // feature values into sorted order, behind the -inf sentinel
    {
        let buffers = Arc::clone(&slot.buffers);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                positions,
                fvalue,
                values,
                ..
            } = &mut *guard;
            fvalue.resize(n + 1, 0.0);
            fvalue[0] = f32::NEG_INFINITY;
            kernels::gather(values.as_slice(), positions, &mut fvalue[1..]);
        });
    }

    // global exclusive prefix scan of the sorted gradients
    {
        let buffers = Arc::clone(&slot.buffers);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                grad_sorted,
                scan,
                block_sums,
                ..
            } = &mut *guard;
            scan.resize(n, G::zero());
            block_sums.resize(n.div_ceil(BLOCK), G::zero());
            kernels::exclusive_scan(grad_sorted, scan, block_sums);
        });
    }

    // gain kernel with per-leaf argmax reduction
    {
        let buffers = Arc::clone(&slot.buffers);
        let cells = Arc::clone(&slot.cells);
        let parent_sum = Arc::clone(&ctx.parent_sum);
        let parent_count = Arc::clone(&ctx.parent_count);
        let gain = ctx.gain;
        slot.stream.run(move || {
            let guard = buffers.lock();
            kernels::evaluate_dense_splits(
                &guard.segments,
                &guard.fvalue,
                &guard.scan,
                &parent_sum,
                &parent_count,
                &gain,
                &cells,
            );
        });
    }

    // copy the per-leaf results to the host mirror
    {
        let buffers = Arc::clone(&slot.buffers);
        let cells = Arc::clone(&slot.cells);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                scan,
                fvalue,
                host_dense,
                ..
            } = &mut *guard;
            host_dense.clear();
            host_dense.resize(leaves, DenseResult::default());
            for (leaf, out) in host_dense.iter_mut().enumerate() {
                let (gain, index) = cells[leaf].load();
                if gain > 0.0 {
                    let i = index as usize;
                    *out = DenseResult {
                        gain,
                        index,
                        scan: scan[i],
                        fvalue_lo: fvalue[i],
                        fvalue_hi: fvalue[i + 1],
                    };
                }
            }
        });
    }
}

fn issue_sparse<K: LeafIndex, G: GradValue>(
    slot: &PipelineSlot<K, G>,
    device: &Device,
    data: &DataMatrix,
    ctx: &LevelCtx<K, G>,
    fid: usize,
) {
    let sid = fid - ctx.columns_dense;
    let m = data.sparse(fid).rows.len();
    let leaves = ctx.leaves;
    tracing::debug!(fid, level = ctx.level, set_rows = m, "issuing sparse feature pass");

    if m == 0 {
        let buffers = Arc::clone(&slot.buffers);
        slot.stream.run(move || {
            let mut b = buffers.lock();
            b.host_sparse.clear();
            b.host_sparse.resize(leaves, G::zero());
        });
        return;
    }

    // row-index list upload, or reuse
    if slot.cached_fid.get() != Some(fid) {
        let buffers = Arc::clone(&slot.buffers);
        match device.sparse_resident(sid) {
            Some(rows) => slot.stream.run(move || {
                buffers.lock().sparse_rows = rows;
            }),
            None => {
                let host_rows = Arc::clone(&data.sparse(fid).rows);
                slot.stream.run(move || {
                    buffers.lock().sparse_rows = Arc::new(host_rows.as_ref().clone());
                });
            }
        }
        slot.cached_fid.set(Some(fid));
    }

    // leaf ids of the set rows, sorted by leaf with row order preserved
    {
        let buffers = Arc::clone(&slot.buffers);
        let row2leaf = Arc::clone(&ctx.row2leaf);
        let bits = ctx.level as u32 + 1;
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                segments,
                positions,
                arena,
                sparse_rows,
                ..
            } = &mut *guard;
            segments.resize(m, K::default());
            kernels::gather(&row2leaf, sparse_rows.as_slice(), segments);
            positions.clear();
            positions.extend_from_slice(sparse_rows.as_slice());
            let scratch = arena.request(arena::pair_bytes::<K, u32>(m, m));
            let (tmp_keys, tmp_values) = arena::typed_pair::<K, u32>(scratch, m, m);
            kernels::radix_sort_pairs(segments, positions, tmp_keys, tmp_values, bits);
        });
    }

    // gradients of the set rows, then per-leaf totals
    {
        let buffers = Arc::clone(&slot.buffers);
        let grad = Arc::clone(&ctx.grad);
        let sparse_stat = Arc::clone(&ctx.sparse_stat);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                positions,
                grad_sorted,
                sparse_offsets,
                sparse_sums,
                ..
            } = &mut *guard;
            grad_sorted.resize(m, G::zero());
            kernels::gather(&grad, positions, grad_sorted);

            sparse_offsets.clear();
            let mut offset = 0usize;
            for leaf in 0..leaves {
                sparse_offsets.push(offset);
                offset += sparse_stat[sid * leaves + leaf] as usize;
            }
            sparse_offsets.push(offset);
            debug_assert_eq!(offset, m);

            sparse_sums.clear();
            sparse_sums.resize(leaves, G::zero());
            kernels::segment_sums(grad_sorted, sparse_offsets, sparse_sums);
        });
    }

    // copy the per-leaf totals to the host mirror
    {
        let buffers = Arc::clone(&slot.buffers);
        slot.stream.run(move || {
            let mut guard = buffers.lock();
            let SlotBuffers {
                sparse_sums,
                host_sparse,
                ..
            } = &mut *guard;
            host_sparse.clear();
            host_sparse.extend_from_slice(sparse_sums);
        });
    }
}
