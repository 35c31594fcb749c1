//! Data-parallel kernels.
//!
//! Floating-point kernels block their input at a fixed width and combine
//! partials in block order, so results do not depend on worker scheduling.
//! Kernels run inside stream jobs; rayon supplies the per-kernel data
//! parallelism.

use rayon::prelude::*;

use grove_core::grad::GradValue;

use super::argmax::ArgMaxCell;
use super::LeafIndex;
use crate::gain::{split_gain, GainParam};

/// Fixed blocking width for scans and reductions.
pub const BLOCK: usize = 4096;

/// `dst[i] = src[index[i]]`.
pub fn gather<T: Copy + Send + Sync>(src: &[T], index: &[u32], dst: &mut [T]) {
    debug_assert_eq!(index.len(), dst.len());
    dst.par_iter_mut()
        .zip(index.par_iter())
        .for_each(|(d, &i)| *d = src[i as usize]);
}

/// Stable LSD radix sort of `(key, value)` pairs by the low `bits` of the
/// key, 8 bits per pass. Scratch slices must match the input length.
pub fn radix_sort_pairs<K: LeafIndex>(
    keys: &mut [K],
    values: &mut [u32],
    tmp_keys: &mut [K],
    tmp_values: &mut [u32],
    bits: u32,
) {
    debug_assert_eq!(keys.len(), values.len());
    debug_assert_eq!(keys.len(), tmp_keys.len());
    debug_assert_eq!(keys.len(), tmp_values.len());

    let passes = bits.div_ceil(8);
    let mut flipped = false;
    for pass in 0..passes {
        let shift = pass * 8;
        let (src_k, src_v, dst_k, dst_v) = if flipped {
            (&mut *tmp_keys, &mut *tmp_values, &mut *keys, &mut *values)
        } else {
            (&mut *keys, &mut *values, &mut *tmp_keys, &mut *tmp_values)
        };

        let mut hist = [0usize; 256];
        for k in src_k.iter() {
            hist[k.digit(shift)] += 1;
        }
        let mut offset = 0usize;
        for slot in hist.iter_mut() {
            let count = *slot;
            *slot = offset;
            offset += count;
        }
        for i in 0..src_k.len() {
            let d = src_k[i].digit(shift);
            dst_k[hist[d]] = src_k[i];
            dst_v[hist[d]] = src_v[i];
            hist[d] += 1;
        }
        flipped = !flipped;
    }
    if flipped {
        keys.copy_from_slice(tmp_keys);
        values.copy_from_slice(tmp_values);
    }
}

/// Global exclusive prefix sum of `input` into `output`.
///
/// Three phases: per-block totals in parallel, a sequential exclusive scan
/// of the block totals, and a parallel write-out. `block_sums` needs
/// `input.len().div_ceil(BLOCK)` slots.
pub fn exclusive_scan<G: GradValue>(input: &[G], output: &mut [G], block_sums: &mut [G]) {
    let n = input.len();
    if n == 0 {
        return;
    }
    debug_assert_eq!(output.len(), n);
    let blocks = n.div_ceil(BLOCK);
    debug_assert!(block_sums.len() >= blocks);

    block_sums[..blocks]
        .par_iter_mut()
        .enumerate()
        .for_each(|(b, sum)| {
            let mut acc = G::zero();
            for v in &input[b * BLOCK..((b + 1) * BLOCK).min(n)] {
                acc += *v;
            }
            *sum = acc;
        });

    let mut acc = G::zero();
    for sum in block_sums[..blocks].iter_mut() {
        let total = *sum;
        *sum = acc;
        acc += total;
    }

    output
        .par_chunks_mut(BLOCK)
        .enumerate()
        .for_each(|(b, out)| {
            let mut acc = block_sums[b];
            for (i, o) in out.iter_mut().enumerate() {
                *o = acc;
                acc += input[b * BLOCK + i];
            }
        });
}

/// Deterministic blocked sum.
pub fn blocked_sum<G: GradValue>(input: &[G]) -> G {
    let partials: Vec<G> = input
        .par_chunks(BLOCK)
        .map(|chunk| {
            let mut acc = G::zero();
            for v in chunk {
                acc += *v;
            }
            acc
        })
        .collect();
    let mut total = G::zero();
    for p in partials {
        total += p;
    }
    total
}

/// Per-segment sums over contiguous slices of `input`; `offsets` has one
/// entry per segment plus the total length.
pub fn segment_sums<G: GradValue>(input: &[G], offsets: &[usize], out: &mut [G]) {
    debug_assert_eq!(offsets.len(), out.len() + 1);
    out.par_iter_mut().enumerate().for_each(|(s, sum)| {
        let mut acc = G::zero();
        for v in &input[offsets[s]..offsets[s + 1]] {
            acc += *v;
        }
        *sum = acc;
    });
}

/// The split-gain kernel: one logical thread per sort position.
///
/// `segments` holds the leaf id at each position, `fvalue` the permuted
/// feature values with the `-inf` sentinel at index 0, `scan` the global
/// exclusive gradient prefix. Positive gains race into the per-leaf argmax
/// cells.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_dense_splits<K: LeafIndex, G: GradValue>(
    segments: &[K],
    fvalue: &[f32],
    scan: &[G],
    parent_sum: &[G],
    parent_count: &[u32],
    gain: &GainParam,
    cells: &[ArgMaxCell],
) {
    debug_assert_eq!(fvalue.len(), segments.len() + 1);
    (0..segments.len()).into_par_iter().for_each(|i| {
        // no split inside a run of equal values
        if fvalue[i + 1] == fvalue[i] {
            return;
        }
        let segment = segments[i].to_usize();
        let left_sum = scan[i] - parent_sum[segment];
        let left_count = i - parent_count[segment] as usize;
        let total_sum = parent_sum[segment + 1] - parent_sum[segment];
        let total_count = (parent_count[segment + 1] - parent_count[segment]) as usize;
        let g = split_gain(left_sum, left_count, total_sum, total_count, gain);
        if g > 0.0 {
            cells[segment].update(g as f32, i as u32);
        }
    });
}
