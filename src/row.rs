//! The row type and the account-tag stand-in for a payer.

use bytes::Bytes;

/// Opaque identifier for the account that pays for a row's storage.
/// The core never interprets this beyond equality/copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Payer(pub u64);

/// A primary-table row: `(primary_key, payer, payload)`.
#[derive(Debug, Clone)]
pub struct Row {
    pub primary_key: u64,
    pub payer: Payer,
    pub payload: Bytes,
}

impl Row {
    pub fn new(primary_key: u64, payer: Payer, payload: impl Into<Bytes>) -> Self {
        Self {
            primary_key,
            payer,
            payload: payload.into(),
        }
    }
}
