//! Property-based tests for the quantified invariants of the storage engine:
//! primary/secondary cardinality equality, undo restoring exact prior state,
//! and squash-then-undo being equivalent to undoing each session in turn.

use chainstore::row::Payer;
use chainstore::table::Table;
use chainstore::undo::TableKey;
use chainstore::{AbiResolver, Database, ScopeKey, StaticAbiResolver};
use itertools::Itertools;
use proptest::prelude::*;

fn scope() -> ScopeKey {
    ScopeKey { code: 1, scope: 1 }
}

fn table_key() -> TableKey {
    TableKey {
        scope: scope(),
        table_name: 1,
        type_id: 0,
    }
}

fn fresh_db(indexes: Vec<chainstore::KeyType>) -> Database<StaticAbiResolver> {
    let mut db = Database::new(StaticAbiResolver(indexes));
    let shard = db.start_shard(vec![scope()], vec![]).unwrap();
    db.create_scope(&shard, scope()).unwrap();
    db.create_table(&shard, table_key()).unwrap();
    db.release_shard(&shard);
    db
}

/// Reads back every primary key currently in `table`, in ascending order, by
/// decoding the 8-byte little-endian payload each row was stored with.
fn collect_keys<A: AbiResolver>(db: &mut Database<A>, table: TableKey) -> Vec<u64> {
    let end = db.db_end(table);
    let mut out = Vec::new();
    let mut cursor = db.db_lowerbound(table, 0).unwrap();
    while cursor != end {
        let mut buf = [0u8; 8];
        db.db_get(table, cursor, &mut buf).unwrap();
        out.push(u64::from_le_bytes(buf));
        cursor = match db.db_next(table, cursor) {
            Ok(h) => h,
            Err(_) => break,
        };
    }
    out
}

fn encoded(key: u64) -> Vec<u8> {
    key.to_le_bytes().to_vec()
}

proptest! {
    /// A table's u64 secondary index always has exactly as many entries as
    /// the primary table, when every emplace is paired with a secondary
    /// store and every removal clears both.
    #[test]
    fn primary_secondary_cardinality_stays_equal(
        keys in prop::collection::vec(0u64..200, 0..60),
        removals in prop::collection::vec(0u64..200, 0..60),
    ) {
        let mut table = Table::new();
        table.declare_u64_index();

        for k in &keys {
            if table.emplace(*k, Payer(1), &b""[..]).is_ok() {
                table.store_u64_secondary(*k, *k, Payer(1)).unwrap();
            }
        }
        for k in &removals {
            table.remove(*k);
        }

        prop_assert_eq!(table.len(), table.u64_index().unwrap().len());
    }

    /// Iterating a table's primary keys through the façade always yields
    /// them in strictly ascending order, regardless of insertion order.
    #[test]
    fn primary_iteration_is_always_ascending(keys in prop::collection::vec(0u64..500, 0..40)) {
        let mut db = fresh_db(vec![]);
        let shard = db.start_shard(vec![scope()], vec![]).unwrap();
        for k in &keys {
            let _ = db.db_store(&shard, table_key(), *k, Payer(1), encoded(*k));
        }
        db.release_shard(&shard);

        let observed = collect_keys(&mut db, table_key());
        prop_assert!(observed.iter().tuple_windows().all(|(a, b)| a < b));

        let unique_sorted: Vec<u64> = keys.iter().copied().unique().sorted().collect();
        prop_assert_eq!(observed, unique_sorted);
    }

    /// A single undo of one session restores the exact primary-key set that
    /// existed before that session was opened, no matter what it did.
    #[test]
    fn undo_restores_exact_primary_key_set(
        seed_keys in prop::collection::vec(0u64..500, 0..20),
        new_key in 0u64..500,
    ) {
        let mut db = fresh_db(vec![]);
        let shard = db.start_shard(vec![scope()], vec![]).unwrap();
        for k in &seed_keys {
            let _ = db.db_store(&shard, table_key(), *k, Payer(1), encoded(*k));
        }
        let before = collect_keys(&mut db, table_key());

        db.open_session(1).unwrap();
        let _ = db.db_store(&shard, table_key(), new_key, Payer(1), encoded(new_key));
        db.undo_session().unwrap();

        let after = collect_keys(&mut db, table_key());
        prop_assert_eq!(before, after);
    }

    /// Squashing two nested sessions into one and undoing it lands on the
    /// same state as undoing the inner session and then the outer one.
    #[test]
    fn squash_then_undo_matches_two_sequential_undos(
        seed_keys in prop::collection::vec(0u64..500, 0..15),
        outer_key in 0u64..500,
        inner_key in 0u64..500,
    ) {
        prop_assume!(outer_key != inner_key);

        let build = || {
            let mut db = fresh_db(vec![]);
            let shard = db.start_shard(vec![scope()], vec![]).unwrap();
            for k in &seed_keys {
                let _ = db.db_store(&shard, table_key(), *k, Payer(1), encoded(*k));
            }
            (db, shard)
        };

        let (mut squashed, shard_a) = build();
        squashed.open_session(1).unwrap();
        let _ = squashed.db_store(&shard_a, table_key(), outer_key, Payer(1), encoded(outer_key));
        squashed.open_session(2).unwrap();
        let _ = squashed.db_store(&shard_a, table_key(), inner_key, Payer(1), encoded(inner_key));
        squashed.squash_sessions().unwrap();
        squashed.undo_session().unwrap();

        let (mut sequential, shard_b) = build();
        sequential.open_session(1).unwrap();
        let _ = sequential.db_store(&shard_b, table_key(), outer_key, Payer(1), encoded(outer_key));
        sequential.open_session(2).unwrap();
        let _ = sequential.db_store(&shard_b, table_key(), inner_key, Payer(1), encoded(inner_key));
        sequential.undo_session().unwrap();
        sequential.undo_session().unwrap();

        let squashed_keys = collect_keys(&mut squashed, table_key());
        let sequential_keys = collect_keys(&mut sequential, table_key());
        prop_assert_eq!(squashed_keys, sequential_keys);
    }
}
