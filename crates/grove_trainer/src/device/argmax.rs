//! Lock-free per-leaf argmax cells.
//!
//! A cell packs `(f32 gain, u32 index)` into one atomically updated 64-bit
//! word: gain bits in the low half, index in the high half. A
//! compare-and-swap loop keeps the pair with the largest gain; equal gains
//! keep the first writer, so consumers must not depend on index
//! tie-breaking.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct ArgMaxCell(AtomicU64);

impl ArgMaxCell {
    /// Zero-initialized: gain 0.0, index 0.
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    fn pack(gain: f32, index: u32) -> u64 {
        (u64::from(index) << 32) | u64::from(gain.to_bits())
    }

    fn unpack(word: u64) -> (f32, u32) {
        (f32::from_bits(word as u32), (word >> 32) as u32)
    }

    pub fn load(&self) -> (f32, u32) {
        Self::unpack(self.0.load(Ordering::Relaxed))
    }

    /// Store `(gain, index)` iff `gain` exceeds the current gain. NaN
    /// candidates never win the comparison and are dropped.
    pub fn update(&self, gain: f32, index: u32) {
        let proposed = Self::pack(gain, index);
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let (current_gain, _) = Self::unpack(current);
            if !(gain > current_gain) {
                return;
            }
            match self.0.compare_exchange_weak(
                current,
                proposed,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for ArgMaxCell {
    fn default() -> Self {
        Self::new()
    }
}
