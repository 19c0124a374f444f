//! `chainstore`: a memory-resident, transactionally-undoable, sharded
//! key-value engine for on-chain table/multi-index storage.
//!
//! This crate implements only the storage core a smart-contract execution
//! environment sits on top of: generic tables with primary and secondary
//! indexes, scope/shard partitioning for parallel writers, an undo session
//! stack for atomic rollback, and the handle-based façade contract code
//! calls into. Block propagation, consensus, WASM execution, ABI
//! serialization, networking, and persistence-to-disk are external
//! collaborators this crate does not implement; see `DESIGN.md`.
//!
//! Module layout mirrors the dependency order leaves-first: [`arena`] is the
//! cell allocator everything else is built on; [`table`] and [`index`] are
//! the primary/secondary containers; [`scope`] partitions tables and gates
//! writers; [`undo`] records and reverses mutations; [`iterator`] hands out
//! stable handles; [`facade`] is the single public entry point
//! ([`facade::Database`]) tying all of the above together.

pub mod arena;
pub mod config;
pub mod error;
pub mod facade;
pub mod index;
pub mod iterator;
pub mod row;
pub mod scope;
pub mod table;
pub mod undo;

pub use error::{ChainStoreError, Result};
pub use facade::{AbiResolver, Database, StaticAbiResolver};
pub use row::Payer;
pub use scope::ScopeKey;
pub use table::KeyType;
pub use undo::TableKey;
