//! The primary table: an ordered `u64 -> Row` map plus up to
//! [`crate::config::MAX_SECONDARY_INDEXES`] secondary containers over the
//! same rows.
//!
//! Every mutation that can affect a secondary index goes through this type
//! rather than the index directly, so the primary/secondary invariants of
//! (cardinality equality, no dangling secondaries) are enforced in
//! one place.

use std::collections::BTreeMap;

use log::trace;

use crate::error::{ChainStoreError, Result};
use crate::index::{Float128, SecondaryIndex, SecondaryIndexes, TotalOrdF64};
use crate::row::{Payer, Row};

/// Which of the five secondary-key families an operation targets. Mirrors
/// the façade's "one family per key type" shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    U64,
    U128,
    U256,
    F64,
    F128,
}

/// A snapshot of a row's prior image, used by the undo log to
/// restore exact state. `None` in the owning record means "this revision
/// created the row"; see [`crate::undo::RowImage`].
#[derive(Debug, Clone)]
pub struct RowImage {
    pub payer: Payer,
    pub payload: bytes::Bytes,
}

impl From<&Row> for RowImage {
    fn from(row: &Row) -> Self {
        Self {
            payer: row.payer,
            payload: row.payload.clone(),
        }
    }
}

/// Full prior state of one primary key across the primary row and every
/// secondary index slot, captured before a mutation so the undo log can
/// restore a row and all of its secondary entries with a single replay step.
#[derive(Debug, Clone, Default)]
pub struct RowSnapshot {
    pub row: Option<RowImage>,
    pub u64_secondary: Option<(u64, Payer)>,
    pub u128_secondary: Option<(u128, Payer)>,
    pub u256_secondary: Option<(primitive_types::U256, Payer)>,
    pub f64_secondary: Option<(TotalOrdF64, Payer)>,
    pub f128_secondary: Option<(Float128, Payer)>,
}

impl RowSnapshot {
    /// A snapshot of "nothing was here", used to record the prior state of a
    /// key an `emplace` introduces for the first time.
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Ordered primary table keyed by `u64`, with up to five secondary indexes
/// declared at creation time by the ABI resolver.
pub struct Table {
    rows: BTreeMap<u64, Row>,
    pub(crate) secondaries: SecondaryIndexes,
    row_count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            secondaries: SecondaryIndexes::default(),
            row_count: 0,
        }
    }

    /// Number of rows currently in the primary index. Maintained
    /// incrementally rather than recomputed (supplemental behaviour, see
    /// SPEC_FULL.md §11.1).
    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Declares a u64 secondary index on this table, if not already present.
    /// Idempotent, since ABI resolution may be invoked more than once for the
    /// same table across a process lifetime.
    pub fn declare_u64_index(&mut self) {
        self.secondaries.u64_index.get_or_insert_with(SecondaryIndex::new);
    }
    pub fn declare_u128_index(&mut self) {
        self.secondaries.u128_index.get_or_insert_with(SecondaryIndex::new);
    }
    pub fn declare_u256_index(&mut self) {
        self.secondaries.u256_index.get_or_insert_with(SecondaryIndex::new);
    }
    pub fn declare_f64_index(&mut self) {
        self.secondaries.f64_index.get_or_insert_with(SecondaryIndex::new);
    }
    pub fn declare_f128_index(&mut self) {
        self.secondaries.f128_index.get_or_insert_with(SecondaryIndex::new);
    }

    /// `emplace`: inserts a new row. Fails with `DuplicateKey` if the primary
    /// key is already present. Returns `primary_key` itself —
    /// rows live directly in the primary `BTreeMap`, so the primary key is
    /// already a stable handle; the façade layer is what hands contract code
    /// an opaque iterator handle over this value.
    pub fn emplace(&mut self, primary_key: u64, payer: Payer, payload: impl Into<bytes::Bytes>) -> Result<u64> {
        if self.rows.contains_key(&primary_key) {
            return Err(ChainStoreError::DuplicateKey(primary_key));
        }
        trace!("table: emplace primary_key={primary_key}");
        let row = Row::new(primary_key, payer, payload);
        self.rows.insert(primary_key, row);
        self.row_count += 1;
        Ok(primary_key)
    }

    /// `modify`: in-place replacement preserving the primary key. The
    /// `new_primary_key` parameter only exists to let callers detect an
    /// attempted key change and report it as `PrimaryKeyChanged` rather than
    /// silently reinserting.
    pub fn modify(
        &mut self,
        primary_key: u64,
        new_primary_key: u64,
        payer: Payer,
        payload: impl Into<bytes::Bytes>,
    ) -> Result<RowImage> {
        if new_primary_key != primary_key {
            return Err(ChainStoreError::PrimaryKeyChanged {
                old: primary_key,
                new: new_primary_key,
            });
        }
        // `primary_key` comes from a previously-issued iterator handle; if
        // the row no longer exists the handle is erased.
        let row = self
            .rows
            .get_mut(&primary_key)
            .ok_or(ChainStoreError::IteratorErased)?;
        let prior = RowImage::from(&*row);
        row.payer = payer;
        row.payload = payload.into();
        trace!("table: modify primary_key={primary_key}");
        Ok(prior)
    }

    /// `remove`: erases the row and every secondary entry referring to it.
    pub fn remove(&mut self, primary_key: u64) -> Option<(Row, RowImage)> {
        let row = self.rows.remove(&primary_key)?;
        self.row_count -= 1;
        self.secondaries.remove_all(primary_key);
        trace!("table: remove primary_key={primary_key}");
        let image = RowImage::from(&row);
        Some((row, image))
    }

    /// Reinserts a row verbatim, used by the undo log to restore a prior
    /// image without going through `emplace`'s duplicate check (the key is
    /// guaranteed absent by the undo invariant).
    pub(crate) fn restore_row(&mut self, primary_key: u64, payer: Payer, payload: bytes::Bytes) {
        self.rows.insert(primary_key, Row::new(primary_key, payer, payload));
        self.row_count += 1;
    }

    pub(crate) fn force_remove(&mut self, primary_key: u64) {
        if self.rows.remove(&primary_key).is_some() {
            self.row_count -= 1;
        }
        self.secondaries.remove_all(primary_key);
    }

    /// Captures the full current state of `primary_key` (row plus every
    /// secondary slot) so a caller can record it as the "before" image ahead
    /// of a mutation. Called unconditionally by the undo-recording layer
    /// even when the key is about to be created for the first
    /// time, in which case every field is `None`.
    pub fn snapshot_row(&self, primary_key: u64) -> RowSnapshot {
        RowSnapshot {
            row: self.rows.get(&primary_key).map(RowImage::from),
            u64_secondary: self
                .secondaries
                .u64_index
                .as_ref()
                .and_then(|i| i.find_primary(primary_key))
                .map(|e| (e.secondary, e.payer)),
            u128_secondary: self
                .secondaries
                .u128_index
                .as_ref()
                .and_then(|i| i.find_primary(primary_key))
                .map(|e| (e.secondary, e.payer)),
            u256_secondary: self
                .secondaries
                .u256_index
                .as_ref()
                .and_then(|i| i.find_primary(primary_key))
                .map(|e| (e.secondary, e.payer)),
            f64_secondary: self
                .secondaries
                .f64_index
                .as_ref()
                .and_then(|i| i.find_primary(primary_key))
                .map(|e| (e.secondary, e.payer)),
            f128_secondary: self
                .secondaries
                .f128_index
                .as_ref()
                .and_then(|i| i.find_primary(primary_key))
                .map(|e| (e.secondary, e.payer)),
        }
    }

    /// Restores `primary_key` to exactly the state described by `snapshot`,
    /// overwriting whatever is currently there. Used by undo replay; never
    /// runs the duplicate/ordering checks `emplace`/`store` do, since the
    /// snapshot is by construction the state that existed at some prior
    /// point in this table's history.
    pub(crate) fn restore_snapshot(&mut self, primary_key: u64, snapshot: &RowSnapshot) {
        match &snapshot.row {
            Some(image) => {
                let row = Row::new(primary_key, image.payer, image.payload.clone());
                if self.rows.insert(primary_key, row).is_none() {
                    self.row_count += 1;
                }
            }
            None => {
                if self.rows.remove(&primary_key).is_some() {
                    self.row_count -= 1;
                }
            }
        }
        restore_secondary(&mut self.secondaries.u64_index, primary_key, snapshot.u64_secondary);
        restore_secondary(&mut self.secondaries.u128_index, primary_key, snapshot.u128_secondary);
        restore_secondary(&mut self.secondaries.u256_index, primary_key, snapshot.u256_secondary);
        restore_secondary(&mut self.secondaries.f64_index, primary_key, snapshot.f64_secondary);
        restore_secondary(&mut self.secondaries.f128_index, primary_key, snapshot.f128_secondary);
    }

    pub fn find(&self, primary_key: u64) -> Option<&Row> {
        self.rows.get(&primary_key)
    }

    /// First entry with key `>= primary_key`.
    pub fn lower_bound(&self, primary_key: u64) -> Option<&Row> {
        self.rows.range(primary_key..).next().map(|(_, r)| r)
    }

    /// First entry with key `> primary_key`.
    pub fn upper_bound(&self, primary_key: u64) -> Option<&Row> {
        self.rows
            .range(primary_key..)
            .find(|(&k, _)| k != primary_key)
            .map(|(_, r)| r)
    }

    pub fn next(&self, primary_key: u64) -> Option<&Row> {
        self.rows
            .range((std::ops::Bound::Excluded(primary_key), std::ops::Bound::Unbounded))
            .next()
            .map(|(_, r)| r)
    }

    pub fn previous(&self, primary_key: u64) -> Option<&Row> {
        self.rows
            .range(..primary_key)
            .next_back()
            .map(|(_, r)| r)
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.values().next()
    }

    pub fn last(&self) -> Option<&Row> {
        self.rows.values().next_back()
    }

    /// `store` a u64 secondary for `primary_key`. Fails with `WrongKeyType`
    /// if this table never declared a u64 index.
    pub fn store_u64_secondary(&mut self, primary_key: u64, secondary: u64, payer: Payer) -> Result<()> {
        self.secondaries
            .u64_index
            .as_mut()
            .ok_or(ChainStoreError::WrongKeyType)?
            .store(primary_key, secondary, payer)
    }

    pub fn update_u64_secondary(&mut self, primary_key: u64, payer: Payer, new_secondary: u64) -> Result<()> {
        self.secondaries
            .u64_index
            .as_mut()
            .ok_or(ChainStoreError::WrongKeyType)?
            .update(primary_key, payer, new_secondary)
    }

    pub fn u64_index(&self) -> Option<&SecondaryIndex<u64>> {
        self.secondaries.u64_index.as_ref()
    }
    pub fn u128_index(&self) -> Option<&SecondaryIndex<u128>> {
        self.secondaries.u128_index.as_ref()
    }
    pub fn u256_index(&self) -> Option<&SecondaryIndex<primitive_types::U256>> {
        self.secondaries.u256_index.as_ref()
    }
    pub fn f64_index(&self) -> Option<&SecondaryIndex<TotalOrdF64>> {
        self.secondaries.f64_index.as_ref()
    }
    pub fn f128_index(&self) -> Option<&SecondaryIndex<Float128>> {
        self.secondaries.f128_index.as_ref()
    }

    pub fn u64_index_mut(&mut self) -> Option<&mut SecondaryIndex<u64>> {
        self.secondaries.u64_index.as_mut()
    }
    pub fn u128_index_mut(&mut self) -> Option<&mut SecondaryIndex<u128>> {
        self.secondaries.u128_index.as_mut()
    }
    pub fn u256_index_mut(&mut self) -> Option<&mut SecondaryIndex<primitive_types::U256>> {
        self.secondaries.u256_index.as_mut()
    }
    pub fn f64_index_mut(&mut self) -> Option<&mut SecondaryIndex<TotalOrdF64>> {
        self.secondaries.f64_index.as_mut()
    }
    pub fn f128_index_mut(&mut self) -> Option<&mut SecondaryIndex<Float128>> {
        self.secondaries.f128_index.as_mut()
    }
}

/// Overwrites `primary_key`'s slot in a single secondary index with
/// `target` (`None` meaning "no entry"). Removes any existing entry first so
/// `store` below never observes a stale duplicate.
fn restore_secondary<K: crate::index::SecondaryKey>(
    index: &mut Option<SecondaryIndex<K>>,
    primary_key: u64,
    target: Option<(K, Payer)>,
) {
    let Some(index) = index.as_mut() else {
        return;
    };
    index.remove(primary_key);
    if let Some((secondary, payer)) = target {
        index
            .store(primary_key, secondary, payer)
            .expect("slot was just cleared above");
    }
}
