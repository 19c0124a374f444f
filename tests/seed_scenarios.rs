//! End-to-end seed scenarios, driven entirely through
//! [`chainstore::Database`] the way a contract execution runtime would.

use chainstore::{Database, KeyType, Payer, ScopeKey, StaticAbiResolver, TableKey};

fn init_test_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

fn scope(tag: u64) -> ScopeKey {
    ScopeKey { code: 7, scope: tag }
}

fn table(name: u64) -> TableKey {
    TableKey {
        scope: scope(1),
        table_name: name,
        type_id: 0,
    }
}

fn db(indexes: Vec<KeyType>) -> Database<StaticAbiResolver> {
    Database::new(StaticAbiResolver(indexes))
}

/// Scenario 1: undo reverts a scope + table + row creation in one step.
#[test]
fn scenario_1_open_session_emplace_then_undo() {
    init_test_logging();
    let mut db = db(vec![]);
    db.open_session(1).unwrap();
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();
    db.db_store(&shard, table(10), 42, Payer(100), &b"\x01\x02"[..]).unwrap();

    db.undo_session().unwrap();

    assert!(!db.find_scope(scope(1)));
}

/// Scenario 2: nested session undo reverts only the secondary-key change.
#[test]
fn scenario_2_nested_undo_only_reverts_secondary_update() {
    let mut db = db(vec![KeyType::U64]);
    db.open_session(1).unwrap();
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();
    let it = db
        .db_store(&shard, table(10), 1, Payer(1), &b"\xAA"[..])
        .unwrap();
    db.db_idx64_store(&shard, table(10), 1, 7, Payer(1)).unwrap();

    db.open_session(2).unwrap();
    let nested = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.db_idx64_update(&nested, table(10), it, Payer(1), 9).unwrap();
    db.undo_session().unwrap();

    let end = db.db_idx64_end(table(10));
    let (seven, seven_pk) = db.db_idx64_find_secondary(table(10), 7).unwrap();
    assert_ne!(seven, end);
    assert_eq!(seven_pk, 1);
    let (nine, _) = db.db_idx64_find_secondary(table(10), 9).unwrap();
    assert_eq!(nine, end);
}

/// Scenario 3: two disjoint shards each insert 1000 rows; both scopes end up
/// with exactly 1000 rows after the parent session commits.
#[test]
fn scenario_3_disjoint_shards_both_reach_1000_rows() {
    let mut db = db(vec![]);
    db.open_session(1).unwrap();
    let shard_a = db.start_shard(vec![scope(100)], vec![]).unwrap();
    let shard_b = db.start_shard(vec![scope(200)], vec![]).unwrap();

    db.create_scope(&shard_a, scope(100)).unwrap();
    db.create_scope(&shard_b, scope(200)).unwrap();
    let table_x = TableKey {
        scope: scope(100),
        table_name: 1,
        type_id: 0,
    };
    let table_y = TableKey {
        scope: scope(200),
        table_name: 1,
        type_id: 0,
    };
    db.create_table(&shard_a, table_x).unwrap();
    db.create_table(&shard_b, table_y).unwrap();

    for k in 0..1000u64 {
        db.db_store(&shard_a, table_x, k, Payer(1), &b""[..]).unwrap();
        db.db_store(&shard_b, table_y, k, Payer(1), &b""[..]).unwrap();
    }

    db.push_session();

    assert_eq!(db.get_scope_table_count(scope(100)).unwrap(), 1);
    assert_eq!(db.get_scope_table_count(scope(200)).unwrap(), 1);
}

/// Scenario 4: starting a shard that overlaps a live shard's write scopes
/// fails with `ScopeConflict`.
#[test]
fn scenario_4_overlapping_shard_rejected() {
    let mut db = db(vec![]);
    let _a = db.start_shard(vec![scope(1), scope(2)], vec![]).unwrap();
    let err = db.start_shard(vec![scope(1)], vec![]).unwrap_err();
    assert!(matches!(err, chainstore::ChainStoreError::ScopeConflict(_)));
}

/// Scenario 5: float secondary enumeration order.
#[test]
fn scenario_5_float_secondary_enumeration_order() {
    use chainstore::index::TotalOrdF64;

    let mut db = db(vec![KeyType::F64]);
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();

    let values = [1.0, -0.0, 0.0, f64::NAN, f64::NEG_INFINITY, f64::INFINITY];
    for (i, v) in values.iter().enumerate() {
        db.db_store(&shard, table(10), i as u64, Payer(1), &b""[..])
            .unwrap();
        db.db_idxdouble_store(&shard, table(10), i as u64, TotalOrdF64(*v), Payer(1))
            .unwrap();
    }

    let end = db.db_idxdouble_end(table(10));
    let mut order = Vec::new();
    let (mut handle, mut primary_key) = db
        .db_idxdouble_lowerbound(table(10), TotalOrdF64(f64::NEG_INFINITY))
        .unwrap();
    while handle != end {
        order.push(primary_key);
        match db.db_idxdouble_next(table(10), handle) {
            Ok((h, pk)) => {
                handle = h;
                primary_key = pk;
            }
            Err(_) => break,
        }
    }
    // Primary keys 0..6 were stored in order [1.0, -0.0, 0.0, NaN, -inf, inf];
    // expect enumeration order -inf, -0.0, +0.0, 1.0, +inf, NaN.
    assert_eq!(order, vec![4, 1, 2, 0, 5, 3]);
}

/// Scenario 6: an iterator handle remains valid (same row, identical
/// payload) across unrelated inserts elsewhere in the same table.
#[test]
fn scenario_6_iterator_handle_stable_across_unrelated_inserts() {
    let mut db = db(vec![]);
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();

    let target = db
        .db_store(&shard, table(10), 5000, Payer(9), &b"payload"[..])
        .unwrap();

    for k in 0..100u64 {
        db.db_store(&shard, table(10), k, Payer(1), &b"x"[..]).unwrap();
    }

    let mut buf = [0u8; 7];
    let size = db.db_get(table(10), target, &mut buf).unwrap();
    assert_eq!(size, 7);
    assert_eq!(&buf, b"payload");
}

#[test]
fn boundary_lower_bound_on_empty_table_is_end() {
    let mut db = db(vec![]);
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();

    let end = db.db_end(table(10));
    assert_eq!(db.db_lowerbound(table(10), 0).unwrap(), end);
}

#[test]
fn boundary_upper_bound_of_max_is_always_end() {
    let mut db = db(vec![]);
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();
    db.db_store(&shard, table(10), u64::MAX, Payer(1), &b""[..]).unwrap();

    let end = db.db_end(table(10));
    assert_eq!(db.db_upperbound(table(10), u64::MAX).unwrap(), end);
}

#[test]
fn emplace_remove_roundtrips_table_to_empty() {
    let mut db = db(vec![KeyType::U64]);
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();

    let it = db.db_store(&shard, table(10), 42, Payer(1), &b"x"[..]).unwrap();
    db.db_idx64_store(&shard, table(10), 42, 7, Payer(1)).unwrap();
    db.db_remove(&shard, table(10), it).unwrap();

    let (found, _) = db.db_idx64_find_secondary(table(10), 7).unwrap();
    assert_eq!(found, db.db_idx64_end(table(10)));
    assert_eq!(db.db_find(table(10), 42).unwrap(), db.db_end(table(10)));
}

/// `db_store` against a table that was never explicitly `create_table`'d
/// fails with `UnknownTable` rather than silently auto-vivifying one; only
/// `Database::create_table` may bring a table into existence.
#[test]
fn db_store_without_create_table_is_unknown_table() {
    let mut db = db(vec![]);
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();

    let err = db
        .db_store(&shard, table(10), 1, Payer(1), &b""[..])
        .unwrap_err();
    assert!(matches!(
        err,
        chainstore::ChainStoreError::UnknownTable { .. }
    ));
    assert_eq!(db.get_scope_table_count(scope(1)).unwrap(), 0);
}

/// A table created and then fully emptied within the same still-open
/// session stays "present" (invariant 4's session-creation clause); once
/// that session is kept (committed into its parent) and the table is
/// vacant, it is no longer reported as present.
#[test]
fn table_presence_follows_vacancy_once_session_commits() {
    let mut db = db(vec![]);
    db.open_session(1).unwrap();
    let shard = db.start_shard(vec![scope(1)], vec![]).unwrap();
    db.create_scope(&shard, scope(1)).unwrap();
    db.create_table(&shard, table(10)).unwrap();
    let it = db.db_store(&shard, table(10), 1, Payer(1), &b""[..]).unwrap();
    db.db_remove(&shard, table(10), it).unwrap();

    assert!(db.find_table_exists(table(10)).unwrap());

    db.push_session();

    assert!(!db.find_table_exists(table(10)).unwrap());
}
