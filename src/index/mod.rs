//! Secondary ordered indexes: `(secondary_key, primary_key) -> payer`.
//!
//! Mirrors the primary table's operation shape but keyed by
//! the composite `(T, u64)` pair, plus a reverse `u64 -> T` map so
//! `find_primary`/uniqueness-of-primary-key checks don't require a linear
//! scan. Keys are typed directly over `K` instead of serialized bytes, since
//! the core never serializes secondary keys.

pub mod key;

use std::collections::BTreeMap;

pub use key::{Float128, SecondaryKey, TotalOrdF64};
use primitive_types::U256;

use crate::error::{ChainStoreError, Result};
use crate::row::Payer;

/// One entry of a secondary index: the key this row was last stored/updated
/// with, and its payer.
#[derive(Debug, Clone, Copy)]
pub struct SecondaryEntry<K> {
    pub secondary: K,
    pub payer: Payer,
}

/// Ordered secondary index over key type `K`.
pub struct SecondaryIndex<K: SecondaryKey> {
    by_secondary: BTreeMap<(K, u64), Payer>,
    by_primary: BTreeMap<u64, K>,
}

impl<K: SecondaryKey> Default for SecondaryIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SecondaryKey> SecondaryIndex<K> {
    pub fn new() -> Self {
        Self {
            by_secondary: BTreeMap::new(),
            by_primary: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_primary.is_empty()
    }

    /// `store`: fails with `DuplicatePrimary` if `primary_key` is already
    /// indexed here.
    pub fn store(&mut self, primary_key: u64, secondary: K, payer: Payer) -> Result<()> {
        if self.by_primary.contains_key(&primary_key) {
            return Err(ChainStoreError::DuplicatePrimary(primary_key));
        }
        let secondary = secondary.canonicalize();
        self.by_primary.insert(primary_key, secondary);
        self.by_secondary.insert((secondary, primary_key), payer);
        Ok(())
    }

    /// Remove the entry for `primary_key`, if any. Used when the owning row
    /// is removed from the table.
    pub fn remove(&mut self, primary_key: u64) -> Option<SecondaryEntry<K>> {
        let secondary = self.by_primary.remove(&primary_key)?;
        let payer = self.by_secondary.remove(&(secondary, primary_key))?;
        Some(SecondaryEntry { secondary, payer })
    }

    /// `update`: repositions the entry within the ordered set; preserves
    /// primary key.
    pub fn update(&mut self, primary_key: u64, payer: Payer, new_secondary: K) -> Result<()> {
        let old_secondary = self
            .by_primary
            .get(&primary_key)
            .copied()
            .ok_or(ChainStoreError::WrongKeyType)?;
        let new_secondary = new_secondary.canonicalize();
        self.by_secondary.remove(&(old_secondary, primary_key));
        self.by_primary.insert(primary_key, new_secondary);
        self.by_secondary
            .insert((new_secondary, primary_key), payer);
        Ok(())
    }

    pub fn find_primary(&self, primary_key: u64) -> Option<SecondaryEntry<K>> {
        let secondary = *self.by_primary.get(&primary_key)?;
        let payer = *self.by_secondary.get(&(secondary, primary_key))?;
        Some(SecondaryEntry { secondary, payer })
    }

    /// First entry with secondary key exactly `secondary`, smallest primary
    /// key first.
    pub fn find_secondary(&self, secondary: K) -> Option<(u64, Payer)> {
        let secondary = secondary.canonicalize();
        self.by_secondary
            .range((secondary, 0)..=(secondary, u64::MAX))
            .next()
            .map(|(&(_, pk), &payer)| (pk, payer))
    }

    /// First entry with secondary key `>= secondary`.
    pub fn lower_bound_secondary(&self, secondary: K) -> Option<(K, u64, Payer)> {
        let secondary = secondary.canonicalize();
        self.by_secondary
            .range((secondary, 0)..)
            .next()
            .map(|(&(s, pk), &payer)| (s, pk, payer))
    }

    /// First entry with secondary key `> secondary`.
    pub fn upper_bound_secondary(&self, secondary: K) -> Option<(K, u64, Payer)> {
        let secondary = secondary.canonicalize();
        self.by_secondary
            .range((secondary, u64::MAX)..)
            .find(|(&(s, _), _)| s != secondary)
            .map(|(&(s, pk), &payer)| (s, pk, payer))
    }

    pub fn next_secondary(&self, secondary: K, primary_key: u64) -> Option<(K, u64, Payer)> {
        self.by_secondary
            .range((secondary, primary_key)..)
            .nth(1)
            .map(|(&(s, pk), &payer)| (s, pk, payer))
    }

    pub fn previous_secondary(&self, secondary: K, primary_key: u64) -> Option<(K, u64, Payer)> {
        self.by_secondary
            .range(..(secondary, primary_key))
            .next_back()
            .map(|(&(s, pk), &payer)| (s, pk, payer))
    }

    pub fn first(&self) -> Option<(K, u64, Payer)> {
        self.by_secondary
            .iter()
            .next()
            .map(|(&(s, pk), &payer)| (s, pk, payer))
    }

    pub fn last(&self) -> Option<(K, u64, Payer)> {
        self.by_secondary
            .iter()
            .next_back()
            .map(|(&(s, pk), &payer)| (s, pk, payer))
    }
}

/// Static set of the five secondary indexes a table may own, one per
/// supported key type. `None` means the table's ABI does not
/// declare a secondary index of that type.
#[derive(Default)]
pub struct SecondaryIndexes {
    pub u64_index: Option<SecondaryIndex<u64>>,
    pub u128_index: Option<SecondaryIndex<u128>>,
    pub u256_index: Option<SecondaryIndex<U256>>,
    pub f64_index: Option<SecondaryIndex<TotalOrdF64>>,
    pub f128_index: Option<SecondaryIndex<Float128>>,
}

impl SecondaryIndexes {
    /// Remove every secondary entry referring to `primary_key`, across
    /// whichever of the five indexes are declared. Invoked by
    /// `Table::remove` so no secondary index is ever left pointing at a row
    /// that no longer exists.
    pub fn remove_all(&mut self, primary_key: u64) {
        if let Some(idx) = self.u64_index.as_mut() {
            idx.remove(primary_key);
        }
        if let Some(idx) = self.u128_index.as_mut() {
            idx.remove(primary_key);
        }
        if let Some(idx) = self.u256_index.as_mut() {
            idx.remove(primary_key);
        }
        if let Some(idx) = self.f64_index.as_mut() {
            idx.remove(primary_key);
        }
        if let Some(idx) = self.f128_index.as_mut() {
            idx.remove(primary_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_find_roundtrip() {
        let mut idx: SecondaryIndex<u64> = SecondaryIndex::new();
        idx.store(1, 7, Payer(100)).unwrap();
        let (pk, payer) = idx.find_secondary(7).unwrap();
        assert_eq!(pk, 1);
        assert_eq!(payer, Payer(100));
    }

    #[test]
    fn duplicate_primary_rejected() {
        let mut idx: SecondaryIndex<u64> = SecondaryIndex::new();
        idx.store(1, 7, Payer(1)).unwrap();
        assert!(matches!(
            idx.store(1, 9, Payer(1)),
            Err(ChainStoreError::DuplicatePrimary(1))
        ));
    }

    #[test]
    fn update_repositions_entry() {
        let mut idx: SecondaryIndex<u64> = SecondaryIndex::new();
        idx.store(1, 7, Payer(1)).unwrap();
        idx.update(1, Payer(1), 9).unwrap();
        assert!(idx.find_secondary(7).is_none());
        let (pk, _) = idx.find_secondary(9).unwrap();
        assert_eq!(pk, 1);
    }

    #[test]
    fn remove_clears_both_maps() {
        let mut idx: SecondaryIndex<u64> = SecondaryIndex::new();
        idx.store(1, 7, Payer(1)).unwrap();
        idx.remove(1);
        assert!(idx.find_secondary(7).is_none());
        assert!(idx.find_primary(1).is_none());
        assert!(idx.is_empty());
    }

    #[test]
    fn bounds_and_traversal() {
        let mut idx: SecondaryIndex<u64> = SecondaryIndex::new();
        idx.store(1, 10, Payer(1)).unwrap();
        idx.store(2, 20, Payer(1)).unwrap();
        idx.store(3, 30, Payer(1)).unwrap();

        let (s, pk, _) = idx.lower_bound_secondary(15).unwrap();
        assert_eq!((s, pk), (20, 2));

        let (s, pk, _) = idx.upper_bound_secondary(20).unwrap();
        assert_eq!((s, pk), (30, 3));

        let (s, pk, _) = idx.next_secondary(10, 1).unwrap();
        assert_eq!((s, pk), (20, 2));

        let (s, pk, _) = idx.previous_secondary(30, 3).unwrap();
        assert_eq!((s, pk), (20, 2));
    }

    #[test]
    fn nan_tolerance_seed_case() {
        let mut idx: SecondaryIndex<TotalOrdF64> = SecondaryIndex::new();
        idx.store(1, TotalOrdF64(f64::NAN), Payer(1)).unwrap();
        let (pk, _) = idx.find_secondary(TotalOrdF64(f64::NAN)).unwrap();
        assert_eq!(pk, 1);
    }
}
