use thiserror::Error;

/// Errors produced by the storage engine.
///
/// Recoverable variants surface to the nearest enclosing façade call and the
/// caller is expected to either retry without the offending mutation or undo
/// the enclosing session. Fatal variants indicate a corrupted arena or a
/// programming error in the caller and should abort the process; see
/// [`ChainStoreError::is_fatal`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStoreError {
    #[error("arena is out of space")]
    OutOfSpace,

    #[error("duplicate primary key {0}")]
    DuplicateKey(u64),

    #[error("duplicate primary key {0} in secondary index")]
    DuplicatePrimary(u64),

    #[error("primary key cannot be changed by modify (was {old}, attempted {new})")]
    PrimaryKeyChanged { old: u64, new: u64 },

    #[error("unknown scope {0}")]
    UnknownScope(u64),

    #[error("unknown table {table} in scope {scope}")]
    UnknownTable { scope: u64, table: u64 },

    #[error("wrong key type for this index")]
    WrongKeyType,

    #[error("iterator exhausted")]
    IteratorExhausted,

    #[error("iterator handle refers to an erased row")]
    IteratorErased,

    #[error("scope conflict: a live shard already owns scope {0}")]
    ScopeConflict(u64),

    #[error("revision {attempted} is not strictly greater than current top {current}")]
    RevisionNotMonotonic { current: u64, attempted: u64 },
}

impl ChainStoreError {
    /// Fatal errors indicate a corrupted arena or caller misuse that cannot
    /// be recovered from within the current session; every other variant is
    /// recoverable by the caller (retry or `Session::undo`).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainStoreError::RevisionNotMonotonic { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChainStoreError>;
