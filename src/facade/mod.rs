//! Backing-store façade: the stable, handle-based entry points the contract
//! execution runtime calls directly.
//!
//! `Database` is an explicit handle passed into every call, in place of
//! a process-wide singleton: every façade call takes `&mut self` (or a
//! `&Shard` proving write authority) and there is no hidden global state.
//! Trace/debug logging on the mutating path logs immediately before the
//! mutation and at `warn` before returning a recoverable error.

use bytes::Bytes;
use log::{trace, warn};
use primitive_types::U256;

use crate::config::DEFAULT_ARENA_CAPACITY;
use crate::error::{ChainStoreError, Result};
use crate::index::{Float128, TotalOrdF64};
use crate::iterator::{IteratorCache, SecondaryValue};
use crate::row::Payer;
use crate::scope::{ScopeKey, ScopeRegistry, Shard};
use crate::table::{KeyType, Table};
use crate::undo::{TableKey, UndoStack};

/// Resolves which secondary-index types a table declares, given the ABI
/// type tag it was created with. A *consumed* interface: the
/// core calls this only at table-creation time and never interprets it
/// further.
pub trait AbiResolver {
    fn secondary_index_types(&self, type_id: u64) -> Vec<KeyType>;
}

/// An [`AbiResolver`] that returns a fixed list regardless of `type_id`.
/// Useful for tests and for callers whose tables all share one schema.
pub struct StaticAbiResolver(pub Vec<KeyType>);

impl AbiResolver for StaticAbiResolver {
    fn secondary_index_types(&self, _type_id: u64) -> Vec<KeyType> {
        self.0.clone()
    }
}

/// The storage engine's single entry point. Owns the scope/shard registry,
/// the undo session stack, and the per-execution-context iterator cache;
/// calls out to a caller-supplied [`AbiResolver`] at table-creation time.
pub struct Database<A: AbiResolver> {
    registry: ScopeRegistry,
    undo: UndoStack,
    iterators: IteratorCache,
    abi: A,
}

impl<A: AbiResolver> Database<A> {
    pub fn new(abi: A) -> Self {
        trace!("database: constructed with arena capacity hint {DEFAULT_ARENA_CAPACITY}");
        Self {
            registry: ScopeRegistry::new(),
            undo: UndoStack::new(),
            iterators: IteratorCache::new(),
            abi,
        }
    }

    /// Starts a fresh execution context: handles from any prior context are
    /// no longer meaningful after this call.
    pub fn begin_execution_context(&mut self) {
        self.iterators = IteratorCache::new();
    }

    // ---- scope / table / shard -------------------------------------------------

    pub fn find_scope(&self, scope: ScopeKey) -> bool {
        self.registry.find_scope(scope)
    }

    pub fn get_scope_table_count(&self, scope: ScopeKey) -> Result<usize> {
        self.registry.get_scope_table_count(scope)
    }

    pub fn create_scope(&mut self, shard: &Shard, scope: ScopeKey) -> Result<()> {
        require_write_authority(shard, scope)?;
        self.registry.create_scope(scope);
        self.undo.record_new_scope(shard, scope);
        Ok(())
    }

    pub fn create_table(&mut self, shard: &Shard, table: TableKey) -> Result<()> {
        require_write_authority(shard, table.scope)?;
        let secondary_types = self.abi.secondary_index_types(table.type_id);
        self.registry.with_scope_mut(table.scope, |scope| {
            let t = scope.create_table(table.table_name, table.type_id);
            declare_indexes(t, &secondary_types);
        })?;
        self.undo.record_new_table(shard, table);
        Ok(())
    }

    /// A table is present iff its primary index is non-empty or it was
    /// created within the currently open session (spec.md §3 invariant 4).
    /// A table that was created and then fully emptied in a prior,
    /// already-committed session is reported absent even though its
    /// (now-vacant) container is still kept around internally — see
    /// [`crate::scope::Scope::table_is_vacant`].
    pub fn find_table_exists(&self, table: TableKey) -> Result<bool> {
        let vacant = self
            .registry
            .with_scope(table.scope, |scope| scope.table_is_vacant(table.table_name, table.type_id))?;
        Ok(!vacant || self.undo.table_created_in_current_session(table))
    }

    pub fn start_shard(&mut self, write_scopes: Vec<ScopeKey>, read_scopes: Vec<ScopeKey>) -> Result<Shard> {
        self.registry.start_shard(write_scopes, read_scopes)
    }

    pub fn release_shard(&mut self, shard: &Shard) {
        self.registry.release_shard(shard);
    }

    // ---- undo session stack -----------------------------------------------------

    pub fn open_session(&mut self, target_revision: u64) -> Result<u64> {
        self.undo.open_session(target_revision)
    }

    pub fn undo_session(&mut self) -> Result<()> {
        self.undo.undo(&self.registry)
    }

    pub fn push_session(&mut self) {
        self.undo.push();
    }

    pub fn squash_sessions(&mut self) -> Result<()> {
        self.undo.squash()
    }

    pub fn commit_revision(&mut self, revision: u64) {
        self.undo.commit_revision(revision);
    }

    pub fn undo_all(&mut self) {
        self.undo.undo_all(&self.registry);
    }

    pub fn current_revision(&self) -> Option<u64> {
        self.undo.current_revision()
    }

    // ---- primary row family (db_*) ----------------------------------------------

    /// `db_store`: inserts a new row. The façade's only authority check is
    /// structural — that `shard` actually owns `table.scope` for writing;
    /// payer-account existence and contract-level authorization are an
    /// external collaborator's job.
    pub fn db_store(
        &mut self,
        shard: &Shard,
        table: TableKey,
        primary_key: u64,
        payer: Payer,
        payload: impl Into<Bytes>,
    ) -> Result<i32> {
        require_write_authority(shard, table.scope)?;
        let prior = self.snapshot_row(table, primary_key)?;
        self.with_table_mut(table, |t| t.emplace(primary_key, payer, payload))??;
        self.undo.record_row_change(shard, table, primary_key, prior);
        trace!("db_store: table={:?} primary_key={primary_key}", table);
        self.iterators.alloc_primary(table, primary_key)
    }

    /// `db_update`: in-place replace, preserving the primary key. `iterator`
    /// must reference a live (non-erased) row.
    pub fn db_update(
        &mut self,
        shard: &Shard,
        table: TableKey,
        iterator: i32,
        payer: Payer,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        require_write_authority(shard, table.scope)?;
        let primary_key = self.iterators.primary_key_of(iterator)?;
        let prior = self.snapshot_row(table, primary_key)?;
        self.with_table_mut(table, |t| t.modify(primary_key, primary_key, payer, payload))??;
        self.undo.record_row_change(shard, table, primary_key, prior);
        Ok(())
    }

    /// `db_remove`: erases the row and every secondary entry referring to
    /// it; no partial removal is ever observable.
    pub fn db_remove(&mut self, shard: &Shard, table: TableKey, iterator: i32) -> Result<()> {
        require_write_authority(shard, table.scope)?;
        let primary_key = self.iterators.primary_key_of(iterator)?;
        let prior = self.snapshot_row(table, primary_key)?;
        self.with_table_mut(table, |t| {
            t.remove(primary_key);
        })?;
        self.undo.record_row_change(shard, table, primary_key, prior);
        self.iterators.mark_erased(table, primary_key, None);
        Ok(())
    }

    /// `db_get`: writes up to `buffer.len()` bytes of the row payload and
    /// returns the full row size regardless of truncation.
    pub fn db_get(&self, table: TableKey, iterator: i32, buffer: &mut [u8]) -> Result<usize> {
        let primary_key = self.iterators.primary_key_of(iterator)?;
        self.registry.with_scope(table.scope, |scope| {
            let t = scope
                .find_table(table.table_name, table.type_id)
                .ok_or(ChainStoreError::UnknownTable {
                    scope: table.scope.scope,
                    table: table.table_name,
                })?;
            let row = t.find(primary_key).ok_or(ChainStoreError::IteratorErased)?;
            let n = row.payload.len().min(buffer.len());
            buffer[..n].copy_from_slice(&row.payload[..n]);
            Ok(row.payload.len())
        })?
    }

    pub fn db_find(&mut self, table: TableKey, primary_key: u64) -> Result<i32> {
        let found = self
            .registry
            .with_scope(table.scope, |scope| {
                scope
                    .find_table(table.table_name, table.type_id)
                    .and_then(|t| t.find(primary_key))
                    .map(|r| r.primary_key)
            })?;
        match found {
            Some(pk) => self.iterators.alloc_primary(table, pk),
            None => Ok(self.iterators.end_handle(table)),
        }
    }

    pub fn db_lowerbound(&mut self, table: TableKey, primary_key: u64) -> Result<i32> {
        self.primary_bound(table, |t| t.lower_bound(primary_key).map(|r| r.primary_key))
    }

    pub fn db_upperbound(&mut self, table: TableKey, primary_key: u64) -> Result<i32> {
        self.primary_bound(table, |t| t.upper_bound(primary_key).map(|r| r.primary_key))
    }

    pub fn db_end(&mut self, table: TableKey) -> i32 {
        self.iterators.end_handle(table)
    }

    /// `db_next`: fails with `IteratorExhausted` rather than wrapping past
    /// the end.
    pub fn db_next(&mut self, table: TableKey, iterator: i32) -> Result<i32> {
        let primary_key = self.iterators.primary_key_of(iterator)?;
        let next = self
            .registry
            .with_scope(table.scope, |scope| {
                scope
                    .find_table(table.table_name, table.type_id)
                    .and_then(|t| t.next(primary_key))
                    .map(|r| r.primary_key)
            })?
            .ok_or(ChainStoreError::IteratorExhausted)?;
        self.iterators.alloc_primary(table, next)
    }

    pub fn db_previous(&mut self, table: TableKey, iterator: i32) -> Result<i32> {
        let primary_key = self.iterators.primary_key_of(iterator)?;
        let prev = self
            .registry
            .with_scope(table.scope, |scope| {
                scope
                    .find_table(table.table_name, table.type_id)
                    .and_then(|t| t.previous(primary_key))
                    .map(|r| r.primary_key)
            })?
            .ok_or(ChainStoreError::IteratorExhausted)?;
        self.iterators.alloc_primary(table, prev)
    }

    fn primary_bound(&mut self, table: TableKey, f: impl FnOnce(&Table) -> Option<u64>) -> Result<i32> {
        let found = self.registry.with_scope(table.scope, |scope| {
            scope.find_table(table.table_name, table.type_id).and_then(f)
        })?;
        match found {
            Some(pk) => self.iterators.alloc_primary(table, pk),
            None => Ok(self.iterators.end_handle(table)),
        }
    }

    /// Looks up an already-`create_table`'d table and runs `f` against it.
    /// Fails with `UnknownTable` rather than auto-vivifying a missing table —
    /// only [`Database::create_table`] is allowed to call
    /// `Scope::create_table`, since that is the one call site that also logs
    /// the creation to the undo stack.
    fn with_table_mut<R>(&mut self, table: TableKey, f: impl FnOnce(&mut Table) -> R) -> Result<R> {
        self.registry
            .with_scope_mut(table.scope, |scope| {
                scope.find_table_mut(table.table_name, table.type_id).map(f)
            })?
            .ok_or(ChainStoreError::UnknownTable {
                scope: table.scope.scope,
                table: table.table_name,
            })
    }

    fn snapshot_row(&self, table: TableKey, primary_key: u64) -> Result<crate::table::RowSnapshot> {
        self.registry.with_scope(table.scope, |scope| {
            scope
                .find_table(table.table_name, table.type_id)
                .map(|t| t.snapshot_row(primary_key))
                .unwrap_or_default()
        })
    }
}

fn require_write_authority(shard: &Shard, scope: ScopeKey) -> Result<()> {
    if !shard.owns_write(scope) {
        warn!("facade: shard attempted to write scope {} outside its claim", scope.scope);
        return Err(ChainStoreError::ScopeConflict(scope.scope));
    }
    Ok(())
}

fn declare_indexes(table: &mut Table, types: &[KeyType]) {
    for t in types {
        match t {
            KeyType::U64 => table.declare_u64_index(),
            KeyType::U128 => table.declare_u128_index(),
            KeyType::U256 => table.declare_u256_index(),
            KeyType::F64 => table.declare_f64_index(),
            KeyType::F128 => table.declare_f128_index(),
        }
    }
}

/// Generates the `idx*_{store,update,remove,find_secondary,find_primary,
/// lowerbound,upperbound,end,next,previous}` family for one secondary key
/// type. Five near-identical families, one key type; a
/// macro keeps them from drifting out of sync the way five hand-copied
/// modules would.
macro_rules! secondary_family {
    ($store:ident, $update:ident, $remove_for:ident, $find_secondary:ident, $find_primary:ident,
     $lowerbound:ident, $upperbound:ident, $end:ident, $next:ident, $previous:ident,
     $key_ty:ty, $field:ident, $field_mut:ident, $variant:ident) => {
        impl<A: AbiResolver> Database<A> {
            pub fn $store(
                &mut self,
                shard: &Shard,
                table: TableKey,
                primary_key: u64,
                secondary: $key_ty,
                payer: Payer,
            ) -> Result<i32> {
                require_write_authority(shard, table.scope)?;
                let prior = self.snapshot_row(table, primary_key)?;
                self.with_table_mut(table, |t| {
                    t.$field_mut()
                        .ok_or(ChainStoreError::WrongKeyType)?
                        .store(primary_key, secondary, payer)
                })??;
                self.undo.record_row_change(shard, table, primary_key, prior);
                self.iterators.alloc_secondary(table, SecondaryValue::$variant(secondary), primary_key)
            }

            pub fn $update(
                &mut self,
                shard: &Shard,
                table: TableKey,
                iterator: i32,
                payer: Payer,
                new_secondary: $key_ty,
            ) -> Result<()> {
                require_write_authority(shard, table.scope)?;
                let (_, primary_key) = self.iterators.secondary_of(iterator)?;
                let prior = self.snapshot_row(table, primary_key)?;
                self.with_table_mut(table, |t| {
                    t.$field_mut()
                        .ok_or(ChainStoreError::WrongKeyType)?
                        .update(primary_key, payer, new_secondary)
                })??;
                self.undo.record_row_change(shard, table, primary_key, prior);
                Ok(())
            }

            /// Removes just this secondary entry, leaving the primary row
            /// (and any other secondary indexes it participates in) intact.
            /// Distinct from `db_remove`, which erases the whole row and
            /// every secondary entry at once.
            pub fn $remove_for(&mut self, shard: &Shard, table: TableKey, iterator: i32) -> Result<()> {
                require_write_authority(shard, table.scope)?;
                let (_, primary_key) = self.iterators.secondary_of(iterator)?;
                let prior = self.snapshot_row(table, primary_key)?;
                self.with_table_mut(table, |t| {
                    t.$field_mut()
                        .ok_or(ChainStoreError::WrongKeyType)?
                        .remove(primary_key)
                        .ok_or(ChainStoreError::WrongKeyType)
                })??;
                self.undo.record_row_change(shard, table, primary_key, prior);
                self.iterators.mark_erased(table, primary_key, Some(crate::iterator::SecondaryValueKind::$variant));
                Ok(())
            }

            /// Returns `(iterator, primary_key)`, mirroring the reference
            /// interface's out-parameter shape for this call.
            pub fn $find_secondary(&mut self, table: TableKey, secondary: $key_ty) -> Result<(i32, u64)> {
                let found = self.registry.with_scope(table.scope, |scope| {
                    scope
                        .find_table(table.table_name, table.type_id)
                        .and_then(|t| t.$field())
                        .and_then(|idx| idx.find_secondary(secondary))
                })?;
                Ok(match found {
                    Some((pk, _)) => (self.iterators.alloc_secondary(table, SecondaryValue::$variant(secondary), pk)?, pk),
                    None => (self.iterators.end_handle(table), 0),
                })
            }

            /// Returns `(iterator, secondary)`: the secondary value
            /// `primary_key` is stored under, alongside its iterator.
            pub fn $find_primary(&mut self, table: TableKey, primary_key: u64) -> Result<(i32, Option<$key_ty>)> {
                let found = self.registry.with_scope(table.scope, |scope| {
                    scope
                        .find_table(table.table_name, table.type_id)
                        .and_then(|t| t.$field())
                        .and_then(|idx| idx.find_primary(primary_key))
                })?;
                Ok(match found {
                    Some(entry) => (
                        self.iterators
                            .alloc_secondary(table, SecondaryValue::$variant(entry.secondary), primary_key)?,
                        Some(entry.secondary),
                    ),
                    None => (self.iterators.end_handle(table), None),
                })
            }

            pub fn $lowerbound(&mut self, table: TableKey, secondary: $key_ty) -> Result<(i32, u64)> {
                let found = self.registry.with_scope(table.scope, |scope| {
                    scope
                        .find_table(table.table_name, table.type_id)
                        .and_then(|t| t.$field())
                        .and_then(|idx| idx.lower_bound_secondary(secondary))
                })?;
                Ok(match found {
                    Some((s, pk, _)) => (self.iterators.alloc_secondary(table, SecondaryValue::$variant(s), pk)?, pk),
                    None => (self.iterators.end_handle(table), 0),
                })
            }

            pub fn $upperbound(&mut self, table: TableKey, secondary: $key_ty) -> Result<(i32, u64)> {
                let found = self.registry.with_scope(table.scope, |scope| {
                    scope
                        .find_table(table.table_name, table.type_id)
                        .and_then(|t| t.$field())
                        .and_then(|idx| idx.upper_bound_secondary(secondary))
                })?;
                Ok(match found {
                    Some((s, pk, _)) => (self.iterators.alloc_secondary(table, SecondaryValue::$variant(s), pk)?, pk),
                    None => (self.iterators.end_handle(table), 0),
                })
            }

            pub fn $end(&mut self, table: TableKey) -> i32 {
                self.iterators.end_handle(table)
            }

            /// `next_secondary`: returns `(iterator', primary')`, failing with `IteratorExhausted` rather than wrapping.
            pub fn $next(&mut self, table: TableKey, iterator: i32) -> Result<(i32, u64)> {
                let (secondary, primary_key) = self.iterators.secondary_of(iterator)?;
                let SecondaryValue::$variant(secondary) = secondary else {
                    return Err(ChainStoreError::WrongKeyType);
                };
                let found = self
                    .registry
                    .with_scope(table.scope, |scope| {
                        scope
                            .find_table(table.table_name, table.type_id)
                            .and_then(|t| t.$field())
                            .and_then(|idx| idx.next_secondary(secondary, primary_key))
                    })?
                    .ok_or(ChainStoreError::IteratorExhausted)?;
                let handle = self
                    .iterators
                    .alloc_secondary(table, SecondaryValue::$variant(found.0), found.1)?;
                Ok((handle, found.1))
            }

            pub fn $previous(&mut self, table: TableKey, iterator: i32) -> Result<(i32, u64)> {
                let (secondary, primary_key) = self.iterators.secondary_of(iterator)?;
                let SecondaryValue::$variant(secondary) = secondary else {
                    return Err(ChainStoreError::WrongKeyType);
                };
                let found = self
                    .registry
                    .with_scope(table.scope, |scope| {
                        scope
                            .find_table(table.table_name, table.type_id)
                            .and_then(|t| t.$field())
                            .and_then(|idx| idx.previous_secondary(secondary, primary_key))
                    })?
                    .ok_or(ChainStoreError::IteratorExhausted)?;
                let handle = self
                    .iterators
                    .alloc_secondary(table, SecondaryValue::$variant(found.0), found.1)?;
                Ok((handle, found.1))
            }
        }
    };
}

secondary_family!(
    db_idx64_store, db_idx64_update, db_idx64_remove, db_idx64_find_secondary, db_idx64_find_primary,
    db_idx64_lowerbound, db_idx64_upperbound, db_idx64_end, db_idx64_next, db_idx64_previous,
    u64, u64_index, u64_index_mut, U64
);
secondary_family!(
    db_idx128_store, db_idx128_update, db_idx128_remove, db_idx128_find_secondary, db_idx128_find_primary,
    db_idx128_lowerbound, db_idx128_upperbound, db_idx128_end, db_idx128_next, db_idx128_previous,
    u128, u128_index, u128_index_mut, U128
);
secondary_family!(
    db_idx256_store, db_idx256_update, db_idx256_remove, db_idx256_find_secondary, db_idx256_find_primary,
    db_idx256_lowerbound, db_idx256_upperbound, db_idx256_end, db_idx256_next, db_idx256_previous,
    U256, u256_index, u256_index_mut, U256
);
secondary_family!(
    db_idxdouble_store, db_idxdouble_update, db_idxdouble_remove, db_idxdouble_find_secondary,
    db_idxdouble_find_primary, db_idxdouble_lowerbound, db_idxdouble_upperbound, db_idxdouble_end,
    db_idxdouble_next, db_idxdouble_previous, TotalOrdF64, f64_index, f64_index_mut, F64
);
secondary_family!(
    db_idxlongdouble_store, db_idxlongdouble_update, db_idxlongdouble_remove,
    db_idxlongdouble_find_secondary, db_idxlongdouble_find_primary, db_idxlongdouble_lowerbound,
    db_idxlongdouble_upperbound, db_idxlongdouble_end, db_idxlongdouble_next, db_idxlongdouble_previous,
    Float128, f128_index, f128_index_mut, F128
);
