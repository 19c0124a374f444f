//! Undo session stack: a monotonic revision counter plus a stack of
//! per-revision undo states, each holding per-shard undo records.
//!
//! A whole-prior-value log rather than a diff log, replayed in strict
//! reverse order on undo. The "value" being snapshotted is a
//! [`RowSnapshot`] — the row plus every secondary slot for one primary key
//! in one table — rather than a raw byte string, because this engine is
//! typed and multi-indexed instead of a flat column store.

use log::{debug, trace, warn};

use crate::error::{ChainStoreError, Result};
use crate::scope::{ScopeKey, ScopeRegistry, Shard};
use crate::table::RowSnapshot;

/// Identifies a table within a scope: `(table_name, type_id)` names its
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub scope: ScopeKey,
    pub table_name: u64,
    pub type_id: u64,
}

/// One recorded row mutation: the full prior state of `primary_key` in
/// `table`, captured immediately before the mutation that produced this
/// record. Undo replays these in reverse order, calling
/// `Table::restore_snapshot` for each.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub table: TableKey,
    pub primary_key: u64,
    pub prior: RowSnapshot,
}

/// Per-shard undo record: which scopes
/// and tables this shard created in the current revision, and every row
/// mutation it made, in chronological order.
#[derive(Debug, Default)]
pub struct ShardUndoRecord {
    pub write_scopes: Vec<ScopeKey>,
    pub new_scopes: Vec<ScopeKey>,
    pub new_tables: Vec<TableKey>,
    pub row_changes: Vec<RowChange>,
}

impl ShardUndoRecord {
    fn for_shard(shard: &Shard) -> Self {
        Self {
            write_scopes: shard.write_scopes.clone(),
            ..Self::default()
        }
    }
}

/// All undo records for one open revision.
#[derive(Debug, Default)]
pub struct UndoState {
    pub revision: u64,
    shards: Vec<ShardUndoRecord>,
}

impl UndoState {
    fn shard_record_mut(&mut self, shard: &Shard) -> &mut ShardUndoRecord {
        if let Some(idx) = self
            .shards
            .iter()
            .position(|r| r.write_scopes == shard.write_scopes)
        {
            return &mut self.shards[idx];
        }
        self.shards.push(ShardUndoRecord::for_shard(shard));
        self.shards.last_mut().unwrap()
    }

    /// Merge `other` (the next-younger sibling in a `squash`) into `self`.
    /// Conflicts are resolved by taking `b`'s effect as authoritative, with
    /// `a`'s original prior image promoted to be `b`'s prior image, when
    /// `b` (here, `other`) didn't already record one for that key.
    fn absorb_younger(&mut self, mut other: UndoState) {
        for other_shard in other.shards.drain(..) {
            let mine = match self
                .shards
                .iter_mut()
                .find(|r| r.write_scopes == other_shard.write_scopes)
            {
                Some(r) => r,
                None => {
                    self.shards.push(ShardUndoRecord {
                        write_scopes: other_shard.write_scopes.clone(),
                        ..ShardUndoRecord::default()
                    });
                    self.shards.last_mut().unwrap()
                }
            };
            mine.new_scopes.extend(other_shard.new_scopes);
            mine.new_tables.extend(other_shard.new_tables);

            for change in other_shard.row_changes {
                let already_has_prior = mine
                    .row_changes
                    .iter()
                    .any(|c| c.table == change.table && c.primary_key == change.primary_key);
                if already_has_prior {
                    // `self` (the elder sibling `a`) already captured the
                    // pre-`a` image for this key; keep it and drop the
                    // younger sibling's duplicate record of the same key,
                    // since `b`'s effect is already reflected by whichever
                    // of `b`'s *later* changes to this key remain below.
                    continue;
                }
                mine.row_changes.push(change);
            }
        }
        self.revision = other.revision;
    }
}

/// The revision-numbered stack of undo states. Owns no table data itself;
/// `undo`/`undo_all` apply their popped records against a [`ScopeRegistry`]
/// passed in by the caller (the façade) rather than through a hidden
/// global.
#[derive(Default)]
pub struct UndoStack {
    stack: Vec<UndoState>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_revision(&self) -> Option<u64> {
        self.stack.last().map(|s| s.revision)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether `table` was created by any shard within the currently open
    /// (not yet committed) session. Backs spec.md §3 invariant 4 ("a table
    /// is present in a scope iff its primary index is non-empty OR it has
    /// been created in the current session") for the façade's existence
    /// check.
    pub fn table_created_in_current_session(&self, table: TableKey) -> bool {
        self.stack
            .last()
            .is_some_and(|state| state.shards.iter().any(|s| s.new_tables.contains(&table)))
    }

    /// `open_session(target_revision)`: pushes a new undo state. Fails with
    /// `RevisionNotMonotonic` if `target_revision` is not strictly greater
    /// than the current top.
    pub fn open_session(&mut self, target_revision: u64) -> Result<u64> {
        if let Some(current) = self.current_revision() {
            if target_revision <= current {
                warn!(
                    "undo stack: revision {target_revision} is not strictly greater than current top {current}"
                );
                return Err(ChainStoreError::RevisionNotMonotonic {
                    current,
                    attempted: target_revision,
                });
            }
        }
        trace!("undo stack: open session at revision {target_revision}");
        self.stack.push(UndoState {
            revision: target_revision,
            shards: Vec::new(),
        });
        Ok(target_revision)
    }

    /// Records that `shard` created `scope` within the currently open
    /// session, so undo can remove it again.
    pub fn record_new_scope(&mut self, shard: &Shard, scope: ScopeKey) {
        if let Some(state) = self.stack.last_mut() {
            state.shard_record_mut(shard).new_scopes.push(scope);
        }
    }

    pub fn record_new_table(&mut self, shard: &Shard, table: TableKey) {
        if let Some(state) = self.stack.last_mut() {
            state.shard_record_mut(shard).new_tables.push(table);
        }
    }

    pub fn record_row_change(&mut self, shard: &Shard, table: TableKey, primary_key: u64, prior: RowSnapshot) {
        if let Some(state) = self.stack.last_mut() {
            state.shard_record_mut(shard).row_changes.push(RowChange {
                table,
                primary_key,
                prior,
            });
        }
    }

    /// `Session::undo()`: pops the top undo state and applies its inverses
    /// against `registry`, in strict reverse order of recording within each
    /// shard record.
    pub fn undo(&mut self, registry: &ScopeRegistry) -> Result<()> {
        let Some(state) = self.stack.pop() else {
            return Ok(());
        };
        debug!("undo stack: undo revision {}", state.revision);
        apply_inverse(registry, state);
        Ok(())
    }

    /// `Session::push()` (keep): closes the session without undoing. If a
    /// parent session exists, its record is merged so the parent's own
    /// eventual undo also reverses this session's effects; this is a plain
    /// append (not a `squash`) because no conflict resolution is needed —
    /// the child always comes strictly after the parent in time.
    pub fn push(&mut self) {
        let Some(child) = self.stack.pop() else {
            return;
        };
        debug!("undo stack: push (keep) revision {}", child.revision);
        match self.stack.last_mut() {
            Some(parent) => {
                for shard in child.shards {
                    let target = match parent
                        .shards
                        .iter()
                        .position(|r| r.write_scopes == shard.write_scopes)
                    {
                        Some(idx) => &mut parent.shards[idx],
                        None => {
                            parent.shards.push(ShardUndoRecord {
                                write_scopes: shard.write_scopes.clone(),
                                ..ShardUndoRecord::default()
                            });
                            parent.shards.last_mut().unwrap()
                        }
                    };
                    target.new_scopes.extend(shard.new_scopes);
                    target.new_tables.extend(shard.new_tables);
                    target.row_changes.extend(shard.row_changes);
                }
            }
            None => {
                // No parent: this was the outermost session. Its effects
                // are now permanent until an explicit `commit_revision`,
                // but since there is no older state to merge into, the
                // record is simply dropped.
            }
        }
    }

    /// `squash(a, b)`: merges the two most-recently-opened undo states into
    /// one. Expects both `a` and `b` to still be live (unpopped) sessions
    /// with `b` directly above `a` on the stack; pops both and pushes the
    /// merged state back, so the pair behaves as a single undo step to any
    /// caller above them.
    pub fn squash(&mut self) -> Result<()> {
        if self.stack.len() < 2 {
            return Err(ChainStoreError::RevisionNotMonotonic {
                current: self.current_revision().unwrap_or(0),
                attempted: 0,
            });
        }
        let b = self.stack.pop().unwrap();
        let a = self.stack.last_mut().unwrap();
        debug!("undo stack: squash revision {} into {}", b.revision, a.revision);
        a.absorb_younger(b);
        Ok(())
    }

    /// `commit_revision(r)`: drops every undo state up to and including
    /// revision `r`; those mutations become permanent.
    pub fn commit_revision(&mut self, r: u64) {
        let before = self.stack.len();
        self.stack.retain(|s| s.revision > r);
        debug!(
            "undo stack: commit through revision {r}, dropped {} state(s)",
            before - self.stack.len()
        );
    }

    /// `undo_all()`: pops the entire stack, applying every state's inverses
    /// from the top down.
    pub fn undo_all(&mut self, registry: &ScopeRegistry) {
        while let Some(state) = self.stack.pop() {
            apply_inverse(registry, state);
        }
    }
}

fn apply_inverse(registry: &ScopeRegistry, state: UndoState) {
    for shard in state.shards {
        // Reverse order of recording, per row-change.
        for change in shard.row_changes.into_iter().rev() {
            let result = registry.with_scope_mut(change.table.scope, |scope| {
                if let Some(table) = scope.find_table_mut(change.table.table_name, change.table.type_id) {
                    table.restore_snapshot(change.primary_key, &change.prior);
                }
            });
            if result.is_err() {
                // The scope itself was already removed by a later inverse
                // (e.g. its creation is undone before its row changes would
                // be, which cannot happen given reverse-chronological
                // order, but a corrupt record should not panic the whole
                // undo pass).
                warn!("undo: scope {} missing while restoring row", change.table.scope.scope);
            }
        }
        // Tables created this session are erased after their row changes
        // are unwound (a table can only be non-empty if it was created and
        // then populated within the same session, both by construction
        // reversed here).
        for table in shard.new_tables.into_iter().rev() {
            let _ = registry.with_scope_mut(table.scope, |scope| {
                scope.remove_table(table.table_name, table.type_id);
            });
        }
        for scope in shard.new_scopes.into_iter().rev() {
            registry.remove_scope(scope);
        }
    }
}
