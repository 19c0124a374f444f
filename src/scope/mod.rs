//! Scope/shard registry: maps `(code, scope)` to a [`Scope`] of named
//! tables, and gates all table access behind a [`Shard`] claim so disjoint
//! writers never touch the same mutable table.

use std::collections::HashSet;

use dashmap::DashMap;
use log::{debug, trace, warn};

use crate::error::{ChainStoreError, Result};
use crate::table::Table;

/// A 64-bit-tagged code (contract account) identifying which contract's
/// tables a scope belongs to, paired with the scope tag itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    pub code: u64,
    pub scope: u64,
}

/// A named partition of tables. Holds a
/// `table_name -> Table` map keyed by `(table_name, type_id)` so two tables
/// with the same name but different row schemas never collide.
#[derive(Default)]
pub struct Scope {
    tables: indexmap::IndexMap<(u64, u64), Table>,
}

impl Scope {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn find_table(&self, table_name: u64, type_id: u64) -> Option<&Table> {
        self.tables.get(&(table_name, type_id))
    }

    pub fn find_table_mut(&mut self, table_name: u64, type_id: u64) -> Option<&mut Table> {
        self.tables.get_mut(&(table_name, type_id))
    }

    pub(crate) fn create_table(&mut self, table_name: u64, type_id: u64) -> &mut Table {
        self.tables.entry((table_name, type_id)).or_default()
    }

    pub(crate) fn remove_table(&mut self, table_name: u64, type_id: u64) {
        self.tables.shift_remove(&(table_name, type_id));
    }

    /// A table is present in a scope iff its primary
    /// index is non-empty. Tables that drop to zero rows and were not
    /// created by the still-open session are pruned by the caller through
    /// this predicate, not automatically, so the undo log can still find
    /// them if needed mid-session.
    pub fn table_is_vacant(&self, table_name: u64, type_id: u64) -> bool {
        self.tables
            .get(&(table_name, type_id))
            .map(|t| t.is_empty())
            .unwrap_or(true)
    }
}

/// Registry of every scope, keyed by `(code, scope)`. `DashMap` gives the
/// concurrent, entry-level locking "disjoint writers never share a lock"
/// calls for; this crate's shard conflict detection makes the stronger
/// guarantee that disjoint *write* scopes never alias at all.
#[derive(Default)]
pub struct ScopeRegistry {
    scopes: DashMap<ScopeKey, Scope>,
    live_write_scopes: HashSet<ScopeKey>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn find_scope(&self, key: ScopeKey) -> bool {
        self.scopes.contains_key(&key)
    }

    pub fn get_scope_table_count(&self, key: ScopeKey) -> Result<usize> {
        self.scopes
            .get(&key)
            .map(|s| s.table_count())
            .ok_or(ChainStoreError::UnknownScope(key.scope))
    }

    /// Registers a new, empty scope. A no-op (not an error) if it already
    /// exists, since the undo log logs creation idempotently per revision.
    pub fn create_scope(&self, key: ScopeKey) {
        if self.scopes.contains_key(&key) {
            return;
        }
        trace!("scope registry: create scope code={} scope={}", key.code, key.scope);
        self.scopes.entry(key).or_default();
    }

    /// Removes a scope entirely. Used by undo when a `create_scope` record
    /// is reversed.
    pub fn remove_scope(&self, key: ScopeKey) {
        trace!("scope registry: remove scope code={} scope={}", key.code, key.scope);
        self.scopes.remove(&key);
    }

    pub fn with_scope_mut<R>(&self, key: ScopeKey, f: impl FnOnce(&mut Scope) -> R) -> Result<R> {
        let mut entry = self
            .scopes
            .get_mut(&key)
            .ok_or(ChainStoreError::UnknownScope(key.scope))?;
        Ok(f(&mut entry))
    }

    pub fn with_scope<R>(&self, key: ScopeKey, f: impl FnOnce(&Scope) -> R) -> Result<R> {
        let entry = self
            .scopes
            .get(&key)
            .ok_or(ChainStoreError::UnknownScope(key.scope))?;
        Ok(f(&entry))
    }

    /// `start_shard`: claims exclusive mutation rights over `write_scopes`.
    /// Fails with `ScopeConflict` if any of them is already claimed by
    /// another live shard in this session. `read_scopes` are
    /// recorded for documentation/debugging only — read access is never
    /// exclusive in this engine.
    pub fn start_shard(
        &mut self,
        write_scopes: Vec<ScopeKey>,
        read_scopes: Vec<ScopeKey>,
    ) -> Result<Shard> {
        for &ws in &write_scopes {
            if self.live_write_scopes.contains(&ws) {
                warn!("scope registry: shard conflict on scope {}", ws.scope);
                return Err(ChainStoreError::ScopeConflict(ws.scope));
            }
        }
        for &ws in &write_scopes {
            self.live_write_scopes.insert(ws);
        }
        debug!("scope registry: shard claimed {} write scope(s)", write_scopes.len());
        Ok(Shard {
            write_scopes,
            read_scopes,
        })
    }

    /// Releases a shard's write claim, making those scopes available to a
    /// future `start_shard` call.
    pub fn release_shard(&mut self, shard: &Shard) {
        for ws in &shard.write_scopes {
            self.live_write_scopes.remove(ws);
        }
    }
}

/// A live, mutating claim on a disjoint set of scopes. All table mutations are routed through the shard that owns the
/// target scope; the shard itself carries no undo state (that lives in the
/// session, see [`crate::undo`]) — it only proves at construction time that
/// no other shard can observe its writes mid-flight.
#[derive(Debug, Clone)]
pub struct Shard {
    pub write_scopes: Vec<ScopeKey>,
    pub read_scopes: Vec<ScopeKey>,
}

impl Shard {
    pub fn owns_write(&self, key: ScopeKey) -> bool {
        self.write_scopes.contains(&key)
    }
}
