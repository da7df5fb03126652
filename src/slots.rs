//! Slot bitmap allocator.
//!
//! Hands out small integer identities (`0..N`) to live drivers. Bit *i* set
//! means slot *i* is owned. The scan is O(N) under a short critical section;
//! it only runs at register/unregister time, never in a worker loop.

use core::cell::Cell;

use critical_section::Mutex;

/// Bitmap of occupied slots, `N <= 32`.
pub struct SlotBitmap<const N: usize> {
    mask: Mutex<Cell<u32>>,
}

impl<const N: usize> SlotBitmap<N> {
    /// Create an empty bitmap.
    pub const fn new() -> Self {
        const { assert!(N > 0 && N <= 32, "slot bitmap holds 1..=32 slots") };

        Self {
            mask: Mutex::new(Cell::new(0)),
        }
    }

    /// Claim the lowest free slot.
    ///
    /// Returns `None` once every slot is taken.
    pub fn find_and_occupy(&self) -> Option<u8> {
        critical_section::with(|cs| {
            let cell = self.mask.borrow(cs);
            let mask = cell.get();
            let index = (0..N).find(|&i| mask & (1 << i) == 0)?;
            cell.set(mask | (1 << index));
            Some(index as u8)
        })
    }

    /// Free a slot. Returns `false` if it was not occupied.
    pub fn release(&self, index: u8) -> bool {
        if index as usize >= N {
            return false;
        }
        critical_section::with(|cs| {
            let cell = self.mask.borrow(cs);
            let mask = cell.get();
            let bit = 1u32 << index;
            cell.set(mask & !bit);
            mask & bit != 0
        })
    }

    /// True if `index` is owned.
    pub fn is_occupied(&self, index: u8) -> bool {
        (index as usize) < N && self.mask() & (1 << index) != 0
    }

    /// Raw occupancy mask.
    pub fn mask(&self) -> u32 {
        critical_section::with(|cs| self.mask.borrow(cs).get())
    }

    /// Number of owned slots.
    pub fn occupied(&self) -> usize {
        self.mask().count_ones() as usize
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for SlotBitmap<N> {
    fn default() -> Self {
        Self::new()
    }
}
