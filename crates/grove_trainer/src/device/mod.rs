//! Execution substrate: worker streams, kernels, scratch arenas and the
//! column-residency front.
//!
//! The trainer schedules feature passes across `overlap` streams; within a
//! stream, work is strictly ordered and the host blocks only at sync
//! points. Dataset columns are made resident up front against a memory
//! budget; the pipeline falls back to per-slot upload for the rest.

pub mod arena;
pub mod argmax;
pub mod kernels;
pub mod stream;

use std::sync::Arc;

use grove_core::data::DataMatrix;
use grove_core::grad::GradValue;
use grove_core::objective::GradHess;

/// Fraction of free memory the resident dataset may occupy.
const RESIDENT_BUDGET: f64 = 0.9;

/// Unsigned leaf-id storage, chosen as the narrowest type fitting
/// `depth + 1` bits for radix-sort efficiency. The `Pod` bound lets the
/// sort borrow its ping-pong buffers from the slot arena.
pub trait LeafIndex:
    Copy + Ord + Default + Send + Sync + std::fmt::Debug + bytemuck::Pod + 'static
{
    const BITS: u32;

    fn from_usize(v: usize) -> Self;
    fn to_usize(self) -> usize;

    /// 8-bit radix digit at `shift`.
    fn digit(self, shift: u32) -> usize {
        (self.to_usize() >> shift) & 0xFF
    }
}

macro_rules! impl_leaf_index {
    ($($t:ty),*) => {
        $(impl LeafIndex for $t {
            const BITS: u32 = <$t>::BITS;

            fn from_usize(v: usize) -> Self {
                v as $t
            }

            fn to_usize(self) -> usize {
                self as usize
            }
        })*
    };
}

impl_leaf_index!(u8, u16, u32, u64);

/// Resident copies of dataset columns, by feature id.
pub struct Device {
    resident_values: Vec<Option<Arc<Vec<f32>>>>,
    resident_index: Vec<Option<Arc<Vec<u32>>>>,
    resident_sparse: Vec<Option<Arc<Vec<u32>>>>,
    resident_bytes: usize,
}

impl Device {
    /// Copy as many dataset columns as the budget allows, in feature-id
    /// order. The remainder is uploaded per slot on demand.
    pub fn init(data: &DataMatrix) -> Self {
        let budget = (available_memory_bytes() as f64 * RESIDENT_BUDGET) as usize;
        let columns_dense = data.columns_dense();
        let mut device = Self {
            resident_values: vec![None; columns_dense],
            resident_index: vec![None; columns_dense],
            resident_sparse: vec![None; data.columns_sparse()],
            resident_bytes: 0,
        };

        let mut resident_columns = 0usize;
        for fid in 0..data.columns() {
            let need = data.column_bytes(fid);
            if device.resident_bytes + need > budget {
                continue;
            }
            if fid < columns_dense {
                let column = data.dense(fid);
                device.resident_values[fid] = Some(Arc::new(column.values.as_ref().clone()));
                device.resident_index[fid] = Some(Arc::new(column.sorted_index.as_ref().clone()));
            } else {
                let column = data.sparse(fid);
                device.resident_sparse[fid - columns_dense] =
                    Some(Arc::new(column.rows.as_ref().clone()));
            }
            device.resident_bytes += need;
            resident_columns += 1;
        }

        tracing::info!(
            resident_columns,
            total_columns = data.columns(),
            resident_bytes = device.resident_bytes,
            budget_bytes = budget,
            "dataset residency"
        );
        device
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub fn dense_resident(&self, fid: usize) -> Option<(Arc<Vec<f32>>, Arc<Vec<u32>>)> {
        match (&self.resident_values[fid], &self.resident_index[fid]) {
            (Some(v), Some(i)) => Some((Arc::clone(v), Arc::clone(i))),
            _ => None,
        }
    }

    pub fn sparse_resident(&self, sid: usize) -> Option<Arc<Vec<u32>>> {
        self.resident_sparse[sid].as_ref().map(Arc::clone)
    }
}

/// Convert a raw gradient slice into the accumulation type and hand it to
/// the kernels.
pub fn upload_grad<G: GradValue>(grad: &[GradHess]) -> Arc<Vec<G>> {
    Arc::new(
        grad.iter()
            .map(|gh| G::from_parts(f64::from(gh.grad), f64::from(gh.hess)))
            .collect(),
    )
}

fn available_memory_bytes() -> u64 {
    use sysinfo::{System, SystemExt};

    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}
