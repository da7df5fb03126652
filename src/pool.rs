//! Fixed-block memory pool with generation-checked handles.
//!
//! # Architecture
//!
//! ```text
//!   free list head
//!        │
//!        ▼
//!   [B2] ──▶ [B0] ──▶ [B3] ──▶ NIL        blocks: [B0][B1][B2][B3]
//!                                                       ▲
//!                                  BlockId{index: 1, generation: 7}
//! ```
//!
//! One contiguous arena of `block_count` blocks, all reserved at
//! construction. Free blocks are chained through an index stored in their
//! header (intrusive free list, LIFO). `alloc` and `free` are O(1) and only
//! touch the list inside a short critical section.
//!
//! # Handles
//!
//! A [`BlockId`] carries the pool tag, the block index and the block
//! generation. The generation is odd while the block is in use and is bumped
//! on every alloc and free, so a stale or doubled `free` and a lookup with a
//! foreign handle are rejected instead of corrupting the list.
//!
//! # Pins
//!
//! Readers [`pin`](MemoryPool::pin) a block to borrow its value. `free`
//! takes the block exclusively (pin count `0 → LOCKED`) and reports
//! [`PoolError::Busy`] while any pin is held, so a value is never dropped
//! under a live borrow.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::{Cell, UnsafeCell};
use core::ops::Deref;
use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use critical_section::Mutex;

use crate::error::PoolError;

/// End of the free list.
const NIL: u16 = u16::MAX;

/// Pin count while `free` owns the block.
const LOCKED: u32 = u32::MAX;

/// Source of per-pool tags.
static NEXT_POOL_TAG: AtomicU16 = AtomicU16::new(1);

/// Generation-checked handle to one pool block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    tag: u16,
    index: u16,
    generation: u32,
}

impl BlockId {
    /// Block index inside the arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation the handle was issued with.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// One arena block: header plus payload.
struct Block<T> {
    /// Odd while allocated.
    generation: AtomicU32,
    /// Active pins, or `LOCKED` during free.
    pins: AtomicU32,
    /// Next free block; only meaningful while on the free list.
    next_free: AtomicU16,
    value: UnsafeCell<Option<T>>,
}

#[derive(Clone, Copy)]
struct FreeList {
    head: u16,
    len: u16,
}

/// Fixed-block pool.
pub struct MemoryPool<T> {
    tag: u16,
    blocks: Box<[Block<T>]>,
    free: Mutex<Cell<FreeList>>,
}

// SAFETY: values are only reached through pins (shared access) or under the
// LOCKED pin state (exclusive access); list links are mutated inside the
// critical section.
unsafe impl<T: Send> Send for MemoryPool<T> {}
unsafe impl<T: Send + Sync> Sync for MemoryPool<T> {}

impl<T> MemoryPool<T> {
    /// Reserve the arena and link every block into the free list.
    ///
    /// Returns [`PoolError::OutOfMemory`] when the arena cannot be reserved
    /// and [`PoolError::InvalidSize`] for a zero or oversized count.
    pub fn new(block_count: usize) -> Result<Self, PoolError> {
        if block_count == 0 || block_count >= NIL as usize {
            return Err(PoolError::InvalidSize);
        }

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(block_count)
            .map_err(|_| PoolError::OutOfMemory)?;

        for i in 0..block_count {
            let next = if i + 1 < block_count { (i + 1) as u16 } else { NIL };
            blocks.push(Block {
                generation: AtomicU32::new(0),
                pins: AtomicU32::new(0),
                next_free: AtomicU16::new(next),
                value: UnsafeCell::new(None),
            });
        }

        Ok(Self {
            tag: NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed),
            blocks: blocks.into_boxed_slice(),
            free: Mutex::new(Cell::new(FreeList {
                head: 0,
                len: block_count as u16,
            })),
        })
    }

    /// Pop a block and move `value` into it.
    ///
    /// `None` means the pool is saturated; `value` is dropped.
    pub fn alloc(&self, value: T) -> Option<BlockId> {
        let index = critical_section::with(|cs| {
            let cell = self.free.borrow(cs);
            let mut list = cell.get();
            if list.head == NIL {
                return None;
            }
            let index = list.head;
            list.head = self.blocks[index as usize].next_free.load(Ordering::Relaxed);
            list.len -= 1;
            cell.set(list);
            Some(index)
        })?;

        let block = &self.blocks[index as usize];
        block.next_free.store(NIL, Ordering::Relaxed);

        // SAFETY: the block left the free list above and its generation is
        // still even, so no pin can reach the value and no free can lock it.
        unsafe {
            *block.value.get() = Some(value);
        }

        let generation = block.generation.load(Ordering::Relaxed).wrapping_add(1);
        block.generation.store(generation, Ordering::Release);

        Some(BlockId {
            tag: self.tag,
            index,
            generation,
        })
    }

    /// Borrow the value behind `id`.
    ///
    /// `None` for foreign, stale or currently-freeing handles.
    pub fn pin(&self, id: BlockId) -> Option<Pinned<'_, T>> {
        if id.tag != self.tag {
            return None;
        }
        let block = self.blocks.get(id.index as usize)?;

        block
            .pins
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |p| {
                if p == LOCKED {
                    None
                } else {
                    Some(p + 1)
                }
            })
            .ok()?;

        if block.generation.load(Ordering::Acquire) != id.generation {
            block.pins.fetch_sub(1, Ordering::Release);
            return None;
        }

        // SAFETY: the pin excludes `free`, and the generation match proves
        // `alloc` finished writing the value (Release/Acquire on generation).
        match unsafe { (*block.value.get()).as_ref() } {
            Some(value) => Some(Pinned { block, value }),
            None => {
                block.pins.fetch_sub(1, Ordering::Release);
                None
            }
        }
    }

    /// Take the value out of `id` and push the block back on the free list.
    pub fn free(&self, id: BlockId) -> Result<T, PoolError> {
        if id.tag != self.tag {
            return Err(PoolError::Foreign);
        }
        let block = self.blocks.get(id.index as usize).ok_or(PoolError::Foreign)?;

        if block.generation.load(Ordering::Acquire) != id.generation {
            return Err(PoolError::Stale);
        }

        block
            .pins
            .compare_exchange(0, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| PoolError::Busy)?;

        if block.generation.load(Ordering::Acquire) != id.generation {
            block.pins.store(0, Ordering::Release);
            return Err(PoolError::Stale);
        }

        // SAFETY: LOCKED excludes every pin and every other free.
        let value = unsafe { (*block.value.get()).take() };

        block
            .generation
            .store(id.generation.wrapping_add(1), Ordering::Release);
        block.pins.store(0, Ordering::Release);

        critical_section::with(|cs| {
            let cell = self.free.borrow(cs);
            let mut list = cell.get();
            block.next_free.store(list.head, Ordering::Relaxed);
            list.head = id.index;
            list.len += 1;
            cell.set(list);
        });

        value.ok_or(PoolError::Stale)
    }

    /// True while `id` refers to a live block of this pool.
    pub fn contains(&self, id: BlockId) -> bool {
        id.tag == self.tag
            && self
                .blocks
                .get(id.index as usize)
                .map(|b| b.generation.load(Ordering::Acquire) == id.generation)
                .unwrap_or(false)
    }

    /// Total number of blocks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks currently on the free list.
    pub fn available(&self) -> usize {
        critical_section::with(|cs| self.free.borrow(cs).get().len as usize)
    }

    /// Blocks currently handed out.
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Bytes per block, header included.
    #[inline]
    pub fn block_size(&self) -> usize {
        core::mem::size_of::<Block<T>>()
    }
}

/// Shared borrow of a pool block. Unpins on drop.
pub struct Pinned<'a, T> {
    block: &'a Block<T>,
    value: &'a T,
}

impl<T> Deref for Pinned<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> Drop for Pinned<'_, T> {
    fn drop(&mut self) {
        self.block.pins.fetch_sub(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_free_basic() {
        let pool = MemoryPool::<u32>::new(4).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);

        let id = pool.alloc(42).unwrap();
        assert_eq!(*pool.pin(id).unwrap(), 42);
        assert_eq!(pool.in_use(), 1);

        assert_eq!(pool.free(id), Ok(42));
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_pool_rejects_zero_blocks() {
        assert!(matches!(MemoryPool::<u8>::new(0), Err(PoolError::InvalidSize)));
    }

    #[test]
    fn test_generation_is_odd_while_live() {
        let pool = MemoryPool::<u8>::new(1).unwrap();
        let a = pool.alloc(1).unwrap();
        assert_eq!(a.generation() % 2, 1);
        pool.free(a).unwrap();
        let b = pool.alloc(2).unwrap();
        assert_eq!(b.generation(), a.generation() + 2);
    }

    #[test]
    fn test_double_free_is_stale() {
        let pool = MemoryPool::<u8>::new(2).unwrap();
        let id = pool.alloc(7).unwrap();
        assert!(pool.free(id).is_ok());
        assert_eq!(pool.free(id), Err(PoolError::Stale));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_free_while_pinned_is_busy() {
        let pool = MemoryPool::<u8>::new(2).unwrap();
        let id = pool.alloc(7).unwrap();
        let pin = pool.pin(id).unwrap();
        assert_eq!(pool.free(id), Err(PoolError::Busy));
        drop(pin);
        assert_eq!(pool.free(id), Ok(7));
    }

    #[test]
    fn test_foreign_block_rejected() {
        let a = MemoryPool::<u8>::new(2).unwrap();
        let b = MemoryPool::<u8>::new(2).unwrap();
        let id = a.alloc(1).unwrap();
        assert_eq!(b.free(id), Err(PoolError::Foreign));
        assert!(b.pin(id).is_none());
        assert!(!b.contains(id));
        assert!(a.contains(id));
    }

    #[test]
    fn test_values_dropped_with_pool() {
        use std::sync::Arc;

        let marker = Arc::new(());
        {
            let pool = MemoryPool::new(3).unwrap();
            pool.alloc(Arc::clone(&marker)).unwrap();
            pool.alloc(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
