//! Iterator cache: converts live primary/secondary iterator positions into
//! small, stable `i32` handles for the duration of one execution context.
//!
//! Handles are allocated sequentially starting at 0 over the same
//! offset-indexed [`crate::arena::Arena`] used for rows, per the arena
//! module's own doc comment ("every cell kind this engine needs (Row,
//! iterator-cache entries)"). A context never deallocates individual
//! entries — it is dropped and rebuilt wholesale when the contract action
//! returns — so the arena's generation counter never advances past 1 and
//! [`crate::arena::Handle::first_generation`] safely reconstructs a handle
//! from its raw index.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use primitive_types::U256;
use siphasher::sip::SipHasher13;

use crate::arena::{Arena, Handle};
use crate::config::DEFAULT_ITERATOR_CACHE_CAPACITY;
use crate::error::{ChainStoreError, Result};
use crate::index::{Float128, TotalOrdF64};
use crate::undo::TableKey;

/// The "end" sentinel handle for `db_end`/`end_secondary`-style calls that
/// take no prior position. `-1`.
pub const GENERIC_END: i32 = -1;

/// A secondary key value of any of the five supported types, carried by a
/// cached secondary-iterator entry so `next`/`previous` can resume ordered
/// traversal after the underlying row has been erased.
#[derive(Debug, Clone, Copy)]
pub enum SecondaryValue {
    U64(u64),
    U128(u128),
    U256(U256),
    F64(TotalOrdF64),
    F128(Float128),
}

/// Discriminant-only counterpart of [`SecondaryValue`], used to scope an
/// erasure to one key-type family without needing a value to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryValueKind {
    U64,
    U128,
    U256,
    F64,
    F128,
}

impl SecondaryValue {
    fn kind(&self) -> SecondaryValueKind {
        match self {
            SecondaryValue::U64(_) => SecondaryValueKind::U64,
            SecondaryValue::U128(_) => SecondaryValueKind::U128,
            SecondaryValue::U256(_) => SecondaryValueKind::U256,
            SecondaryValue::F64(_) => SecondaryValueKind::F64,
            SecondaryValue::F128(_) => SecondaryValueKind::F128,
        }
    }
}

#[derive(Debug, Clone)]
struct PrimaryIteratorState {
    table: TableKey,
    primary_key: u64,
    erased: bool,
}

#[derive(Debug, Clone)]
struct SecondaryIteratorState {
    table: TableKey,
    secondary: SecondaryValue,
    primary_key: u64,
    erased: bool,
}

enum CachedEntry {
    Primary(PrimaryIteratorState),
    Secondary(SecondaryIteratorState),
}

/// Per-execution-context cache. Construct one per contract action and drop
/// it on return; handles from one context are meaningless in another.
pub struct IteratorCache {
    entries: Arena<CachedEntry>,
    end_handles: HashMap<TableKey, i32>,
}

impl Default for IteratorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IteratorCache {
    pub fn new() -> Self {
        Self {
            entries: Arena::with_capacity(DEFAULT_ITERATOR_CACHE_CAPACITY),
            end_handles: HashMap::new(),
        }
    }

    /// Converts an arena index into its `i32` handle. Fails with
    /// `OutOfSpace` once the cache has issued more live handles than fit in
    /// the positive `i32` range — the one way this engine's arena (which
    /// only backs the iterator cache, see the module doc comment) can
    /// actually run out of room, matching spec.md §4.1's "arena exhausted"
    /// contract for this re-architected, index-rather-than-mmap layout.
    fn handle_to_i32(handle: Handle) -> Result<i32> {
        i32::try_from(handle.index()).map_err(|_| ChainStoreError::OutOfSpace)
    }

    fn i32_to_handle(raw: i32) -> Option<Handle> {
        u32::try_from(raw).ok().map(Handle::first_generation)
    }

    /// Deterministic end-handle for `(code, scope, table)`, stable across
    /// repeated calls with identical arguments within this context. Always
    /// a negative value other than `-1`.
    pub fn end_handle(&mut self, table: TableKey) -> i32 {
        if let Some(&h) = self.end_handles.get(&table) {
            return h;
        }
        let mut hasher = SipHasher13::new();
        table.scope.code.hash(&mut hasher);
        table.scope.scope.hash(&mut hasher);
        table.table_name.hash(&mut hasher);
        table.type_id.hash(&mut hasher);
        let digest = hasher.finish();
        // Fold into the negative i32 range, excluding -1 (the generic end)
        // and i32::MIN (not representable as a positive magnitude below).
        let magnitude = (digest % (i32::MAX as u64 - 1)) + 2;
        let handle = -(magnitude as i32);
        self.end_handles.insert(table, handle);
        handle
    }

    pub fn alloc_primary(&mut self, table: TableKey, primary_key: u64) -> Result<i32> {
        let handle = self.entries.allocate(CachedEntry::Primary(PrimaryIteratorState {
            table,
            primary_key,
            erased: false,
        }));
        Self::handle_to_i32(handle)
    }

    pub fn alloc_secondary(&mut self, table: TableKey, secondary: SecondaryValue, primary_key: u64) -> Result<i32> {
        let handle = self.entries.allocate(CachedEntry::Secondary(SecondaryIteratorState {
            table,
            secondary,
            primary_key,
            erased: false,
        }));
        Self::handle_to_i32(handle)
    }

    /// `get`-equivalent: returns the live primary key for a primary-iterator
    /// handle. Fails with `IteratorErased` if the referenced row has been
    /// removed, and `IteratorExhausted` for `-1`/an out-of-range handle.
    pub fn primary_key_of(&self, raw: i32) -> Result<u64> {
        if raw < 0 {
            return Err(ChainStoreError::IteratorExhausted);
        }
        let handle = Self::i32_to_handle(raw).ok_or(ChainStoreError::IteratorExhausted)?;
        match self.entries.get(handle) {
            Some(CachedEntry::Primary(state)) if !state.erased => Ok(state.primary_key),
            Some(CachedEntry::Primary(_)) => Err(ChainStoreError::IteratorErased),
            _ => Err(ChainStoreError::IteratorExhausted),
        }
    }

    pub fn secondary_of(&self, raw: i32) -> Result<(SecondaryValue, u64)> {
        if raw < 0 {
            return Err(ChainStoreError::IteratorExhausted);
        }
        let handle = Self::i32_to_handle(raw).ok_or(ChainStoreError::IteratorExhausted)?;
        match self.entries.get(handle) {
            Some(CachedEntry::Secondary(state)) if !state.erased => Ok((state.secondary, state.primary_key)),
            Some(CachedEntry::Secondary(_)) => Err(ChainStoreError::IteratorErased),
            _ => Err(ChainStoreError::IteratorExhausted),
        }
    }

    /// Marks every cached handle pointing at `(table, primary_key)` as
    /// erased. `next`/`previous` remain usable (the cache still has the
    /// neighbouring key); `get` on it now fails. A full row
    /// removal (`db_remove`) erases the primary iterator and every
    /// secondary iterator for `primary_key`; removing a single secondary
    /// entry (`db_idx*_remove`) erases only that key type's iterators,
    /// leaving the primary row and its other secondary entries untouched.
    pub fn mark_erased(&mut self, table: TableKey, primary_key: u64, only_kind: Option<SecondaryValueKind>) {
        for entry in self.entries.iter_mut() {
            match entry {
                CachedEntry::Primary(state) if only_kind.is_none() && state.table == table && state.primary_key == primary_key => {
                    state.erased = true;
                }
                CachedEntry::Secondary(state) if state.table == table && state.primary_key == primary_key => {
                    if only_kind.is_none() || only_kind == Some(state.secondary.kind()) {
                        state.erased = true;
                    }
                }
                _ => {}
            }
        }
    }
}
