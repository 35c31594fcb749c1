//! Grow-only scratch arena shared by a pipeline slot.
//!
//! One raw buffer per slot serves the radix sort's ping-pong space and
//! other kernel temporaries. It grows to the largest request seen (free +
//! reallocate) and never shrinks. Scratch views are plain-old-data slice
//! casts; element types that are not POD-castable (gradient pairs) use
//! typed slot buffers instead of the arena.

/// Backing storage is `u128`, so the base pointer is 16-byte aligned and
/// any POD scratch element type can view into it.
pub struct DeviceArena {
    buf: Vec<u128>,
}

impl DeviceArena {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn size_bytes(&self) -> usize {
        self.buf.len() * 16
    }

    /// Borrow `bytes` of scratch, growing on demand.
    pub fn request(&mut self, bytes: usize) -> &mut [u8] {
        let words = bytes.div_ceil(16);
        if words > self.buf.len() {
            tracing::debug!(
                old_bytes = self.buf.len() * 16,
                new_bytes = words * 16,
                "growing slot arena"
            );
            self.buf = vec![0u128; words];
        }
        &mut bytemuck::cast_slice_mut::<u128, u8>(self.buf.as_mut_slice())[..bytes]
    }
}

impl Default for DeviceArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes to request for a two-slice scratch split of `a_len` As followed by
/// `b_len` Bs.
pub fn pair_bytes<A, B>(a_len: usize, b_len: usize) -> usize {
    span::<A>(a_len) + b_len * std::mem::size_of::<B>()
}

fn span<T>(len: usize) -> usize {
    (len * std::mem::size_of::<T>()).next_multiple_of(16)
}

/// View a scratch byte range as one typed slice. The caller must have
/// obtained `bytes` from [`DeviceArena::request`] (or a 16-byte-aligned
/// split of it).
pub fn typed<T: bytemuck::Pod>(bytes: &mut [u8], len: usize) -> &mut [T] {
    bytemuck::cast_slice_mut(&mut bytes[..len * std::mem::size_of::<T>()])
}

/// Split one scratch request into two typed slices.
pub fn typed_pair<A: bytemuck::Pod, B: bytemuck::Pod>(
    bytes: &mut [u8],
    a_len: usize,
    b_len: usize,
) -> (&mut [A], &mut [B]) {
    let (a_raw, b_raw) = bytes.split_at_mut(span::<A>(a_len));
    (typed(a_raw, a_len), typed(b_raw, b_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_monotonically() {
        let mut arena = DeviceArena::new();
        assert_eq!(arena.size_bytes(), 0);

        arena.request(100);
        let after_first = arena.size_bytes();
        assert!(after_first >= 100);

        // smaller request keeps the allocation
        arena.request(10);
        assert_eq!(arena.size_bytes(), after_first);

        arena.request(1000);
        assert!(arena.size_bytes() >= 1000);
    }

    #[test]
    fn test_typed_views() {
        let mut arena = DeviceArena::new();
        let bytes = arena.request(pair_bytes::<u64, u32>(8, 16));
        let (a, b) = typed_pair::<u64, u32>(bytes, 8, 16);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 16);

        a[7] = u64::MAX;
        b[15] = 7;
        assert_eq!(a[7], u64::MAX);
        assert_eq!(b[15], 7);
    }

    #[test]
    fn test_typed_floats() {
        let mut arena = DeviceArena::new();
        let bytes = arena.request(64 * std::mem::size_of::<f64>());
        let scratch = typed::<f64>(bytes, 64);
        scratch[0] = 1.5;
        scratch[63] = -2.5;
        assert_eq!(scratch[0], 1.5);
        assert_eq!(scratch[63], -2.5);
    }
}
