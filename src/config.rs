//! Tuning constants for the storage engine.
//!
//! Kept as plain `pub const`s rather than a config-file/env-var layer: the
//! engine is embedded and configured by its caller through constructor
//! arguments (see [`crate::facade::Database::new`]), not by a process-wide
//! configuration object.

/// Maximum number of secondary indexes a single table may declare, one per
/// supported key type (u64, u128, u256, f64, f128).
pub const MAX_SECONDARY_INDEXES: usize = 5;

/// Sizing hint logged when a `Database` is constructed, mirroring a
/// startup trace of cache/page-pool sizing. Purely informational here:
/// scopes and tables grow on demand and are never pre-sized from this
/// constant.
pub const DEFAULT_ARENA_CAPACITY: usize = 1024;

/// Initial capacity reserved for the iterator cache's handle slab.
pub const DEFAULT_ITERATOR_CACHE_CAPACITY: usize = 64;
