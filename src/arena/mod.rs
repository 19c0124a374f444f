//! Fixed-size cell allocator, indexed rather than pointer-based.
//!
//! A memory-mapped engine would describe a byte-oriented, size-classed
//! allocator over a single mapped region, handing out `(size, align) ->
//! offset` cells so that internal references survive being remapped at a
//! different base address. This crate keeps the *offsets, not addresses*
//! requirement but drops the raw-byte/size-class machinery: a cell kind that
//! needs stable, generation-checked handles (the [`crate::iterator`] cache)
//! gets its own monomorphic `Arena<T>` — a `Vec<Slot<T>>` with a free list of
//! reusable indices. Rows themselves live directly in a table's primary
//! `BTreeMap<u64, Row>` (the primary key is already a stable,
//! naturally-ordered handle, so there is no row arena). There is no
//! fragmentation to bound because every slot in a given arena is the same
//! size; growing the arena is a `Vec` push, which never invalidates an
//! already-issued `Handle` (it is an index, not a pointer).

use std::num::NonZeroU32;

/// An offset into an [`Arena`]. Stable across growth; invalidated only by an
/// explicit `deallocate` of the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: NonZeroU32,
}

impl Handle {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Reconstructs the handle for the first-generation occupant of
    /// `index`. Only valid for arenas that never call `deallocate` within
    /// the handle's lifetime (e.g. the iterator cache, which is dropped and
    /// rebuilt wholesale at the end of an execution context rather than
    /// freeing individual cells) — such arenas never advance a slot's
    /// generation past 1, so the index alone determines the handle.
    pub fn first_generation(index: u32) -> Self {
        Self {
            index,
            generation: NonZeroU32::new(1).unwrap(),
        }
    }
}

enum Slot<T> {
    Occupied { generation: NonZeroU32, value: T },
    Free {
        next_free: Option<u32>,
        // Generation the freed slot was last occupied with, so the next
        // occupant gets a strictly greater one.
        last_generation: NonZeroU32,
    },
}

/// Generic offset-indexed cell allocator.
///
/// `allocate` is O(1) amortized (free-list pop, or a `Vec` push on growth).
/// `deallocate` is O(1) (push onto the free list). Every occupied slot
/// carries a generation counter so a stale `Handle` from a deallocated slot
/// is rejected instead of silently aliasing whatever was allocated into the
/// reused index.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Number of currently occupied cells.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocate a cell, moving `value` into it, and return its handle.
    pub fn allocate(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_head.take() {
            let generation = match self.slots[index as usize] {
                Slot::Free {
                    next_free,
                    last_generation,
                } => {
                    self.free_head = next_free;
                    NonZeroU32::new(last_generation.get().wrapping_add(1)).unwrap_or(
                        // wrapped past u32::MAX back to 0: skip to 1
                        NonZeroU32::new(1).unwrap(),
                    )
                }
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.slots[index as usize] = Slot::Occupied { generation, value };
            Handle { index, generation }
        } else {
            let index = self.slots.len() as u32;
            let generation = NonZeroU32::new(1).unwrap();
            self.slots.push(Slot::Occupied { generation, value });
            Handle { index, generation }
        }
    }

    /// Free the cell referenced by `handle`, returning its value if the
    /// handle was live.
    pub fn deallocate(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let last_generation = *generation;
                let Slot::Occupied { value, .. } = std::mem::replace(
                    slot,
                    Slot::Free {
                        next_free: self.free_head,
                        last_generation,
                    },
                ) else {
                    unreachable!()
                };
                self.free_head = Some(handle.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Iterates mutably over every occupied cell, in index order. Used by
    /// callers that need to scan-and-update a whole arena's worth of
    /// entries (e.g. the iterator cache marking every handle for a removed
    /// row as erased) rather than look one up by handle.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Free { .. } => None,
        })
    }
}
