//! Intrusive doubly-linked list over pool blocks.
//!
//! Every record carries its own [`Links`]; the list itself only stores head,
//! tail and count. Links are `BlockId`s, not pointers, so a link to a freed
//! block can never be followed (the pool rejects the stale generation).
//!
//! All structural mutation happens inside one short critical section: no
//! allocation, no blocking, O(1) for insert and remove. Iteration works on a
//! snapshot taken under the same section, so a concurrent append is simply
//! not observed.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::pool::{BlockId, MemoryPool};

#[derive(Clone, Copy, Default)]
struct LinkPair {
    linked: bool,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

/// Links embedded in a list member.
pub struct Links {
    pair: Mutex<Cell<LinkPair>>,
}

impl Links {
    pub const fn new() -> Self {
        Self {
            pair: Mutex::new(Cell::new(LinkPair {
                linked: false,
                prev: None,
                next: None,
            })),
        }
    }

    fn get(&self, cs: CriticalSection<'_>) -> LinkPair {
        self.pair.borrow(cs).get()
    }

    fn set(&self, cs: CriticalSection<'_>, pair: LinkPair) {
        self.pair.borrow(cs).set(pair);
    }

    /// True while the owner is on a list.
    pub fn is_linked(&self) -> bool {
        critical_section::with(|cs| self.get(cs).linked)
    }
}

impl Default for Links {
    fn default() -> Self {
        Self::new()
    }
}

/// Types that can be chained by [`IntrusiveList`].
pub trait Linked {
    fn links(&self) -> &Links;
}

#[derive(Clone, Copy)]
struct Ends {
    head: Option<BlockId>,
    tail: Option<BlockId>,
    len: usize,
}

/// Registry list: head, tail and count.
pub struct IntrusiveList {
    ends: Mutex<Cell<Ends>>,
}

impl IntrusiveList {
    pub const fn new() -> Self {
        Self {
            ends: Mutex::new(Cell::new(Ends {
                head: None,
                tail: None,
                len: 0,
            })),
        }
    }

    /// Append `id` at the tail.
    ///
    /// Returns `false` if `id` is stale or already linked.
    pub fn push_back<T: Linked>(&self, pool: &MemoryPool<T>, id: BlockId) -> bool {
        critical_section::with(|cs| {
            let Some(member) = pool.pin(id) else {
                return false;
            };
            if member.links().get(cs).linked {
                return false;
            }

            let cell = self.ends.borrow(cs);
            let mut ends = cell.get();

            match ends.tail.and_then(|tail| pool.pin(tail)) {
                Some(tail) => {
                    let mut pair = tail.links().get(cs);
                    pair.next = Some(id);
                    tail.links().set(cs, pair);
                }
                None => ends.head = Some(id),
            }

            member.links().set(
                cs,
                LinkPair {
                    linked: true,
                    prev: ends.tail,
                    next: None,
                },
            );
            ends.tail = Some(id);
            ends.len += 1;
            cell.set(ends);
            true
        })
    }

    /// Unlink `id` in O(1).
    ///
    /// Returns `false` if `id` is stale or not on the list.
    pub fn remove<T: Linked>(&self, pool: &MemoryPool<T>, id: BlockId) -> bool {
        critical_section::with(|cs| {
            let Some(member) = pool.pin(id) else {
                return false;
            };
            let pair = member.links().get(cs);
            if !pair.linked {
                return false;
            }

            let cell = self.ends.borrow(cs);
            let mut ends = cell.get();

            match pair.prev.and_then(|prev| pool.pin(prev)) {
                Some(prev) => {
                    let mut p = prev.links().get(cs);
                    p.next = pair.next;
                    prev.links().set(cs, p);
                }
                None => ends.head = pair.next,
            }
            match pair.next.and_then(|next| pool.pin(next)) {
                Some(next) => {
                    let mut n = next.links().get(cs);
                    n.prev = pair.prev;
                    next.links().set(cs, n);
                }
                None => ends.tail = pair.prev,
            }

            member.links().set(cs, LinkPair::default());
            ends.len -= 1;
            cell.set(ends);
            true
        })
    }

    /// Ids of the first `N` members, head to tail.
    pub fn snapshot<T: Linked, const N: usize>(
        &self,
        pool: &MemoryPool<T>,
    ) -> heapless::Vec<BlockId, N> {
        critical_section::with(|cs| {
            let mut ids = heapless::Vec::new();
            let mut cursor = self.ends.borrow(cs).get().head;
            while let Some(id) = cursor {
                if ids.push(id).is_err() {
                    break;
                }
                cursor = pool.pin(id).and_then(|member| member.links().get(cs).next);
            }
            ids
        })
    }

    /// Number of linked members.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ends.borrow(cs).get().len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IntrusiveList {
    fn default() -> Self {
        Self::new()
    }
}
