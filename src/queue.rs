//! Bounded receive queue.
//!
//! Fixed array of `u32` values with head/tail indices. A stored `0` marks an
//! empty cell, so:
//!
//! - pushing `0` is a no-op (a real payload of `0` is indistinguishable
//!   from "nothing received" and is dropped),
//! - pushing into a full queue is a no-op, never an overwrite,
//! - popping an empty queue yields `0`.
//!
//! Not synchronized: every access happens under the owning driver's token.

/// Value that marks an empty cell.
pub const EMPTY: u32 = 0;

/// Circular buffer of received values.
pub struct BoundedQueue<const N: usize> {
    cells: [u32; N],
    head: usize,
    tail: usize,
    dropped: u32,
}

impl<const N: usize> BoundedQueue<N> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        const { assert!(N > 0, "queue needs at least one cell") };

        Self {
            cells: [EMPTY; N],
            head: 0,
            tail: 0,
            dropped: 0,
        }
    }

    /// Append a value.
    ///
    /// Returns `false` if the value was dropped (sentinel or full).
    pub fn push(&mut self, value: u32) -> bool {
        if value == EMPTY {
            self.dropped = self.dropped.wrapping_add(1);
            return false;
        }
        if self.cells[self.tail] != EMPTY {
            self.dropped = self.dropped.wrapping_add(1);
            return false;
        }
        self.cells[self.tail] = value;
        self.tail = (self.tail + 1) % N;
        true
    }

    /// Count a value rejected before it reached the queue.
    #[inline]
    pub fn discard(&mut self) {
        self.dropped = self.dropped.wrapping_add(1);
    }

    /// Remove the oldest value, `0` if empty.
    pub fn pop(&mut self) -> u32 {
        let value = self.cells[self.head];
        if value == EMPTY {
            return EMPTY;
        }
        self.cells[self.head] = EMPTY;
        self.head = (self.head + 1) % N;
        value
    }

    /// Oldest value without removing it, `0` if empty.
    #[inline]
    pub fn peek(&self) -> u32 {
        self.cells[self.head]
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        if self.cells[self.head] == EMPTY {
            0
        } else if self.head < self.tail {
            self.tail - self.head
        } else {
            N - self.head + self.tail
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells[self.head] == EMPTY
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.cells[self.tail] != EMPTY
    }

    /// Values rejected since creation.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Discard every stored value.
    pub fn clear(&mut self) {
        self.cells = [EMPTY; N];
        self.head = 0;
        self.tail = 0;
    }
}

impl<const N: usize> Default for BoundedQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_tracks_wrap() {
        let mut q = BoundedQueue::<4>::new();
        for v in 1..=4 {
            assert!(q.push(v));
        }
        assert_eq!(q.len(), 4);
        assert!(q.is_full());

        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert!(q.push(5));
        assert_eq!(q.len(), 3);
        assert_eq!(q.peek(), 3);
    }

    #[test]
    fn test_dropped_counter() {
        let mut q = BoundedQueue::<1>::new();
        assert!(!q.push(0));
        assert!(q.push(9));
        assert!(!q.push(10));
        assert_eq!(q.dropped(), 2);
    }

    #[test]
    fn test_clear() {
        let mut q = BoundedQueue::<3>::new();
        q.push(1);
        q.push(2);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.pop(), 0);
    }
}
