//! Durable key-value storage contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the string→string store capability used by lifecycle records and
//!   per-plugin private storage.
//! - Keep SQL details behind the `KeyValueStore` boundary.
//!
//! # Invariants
//! - Every namespace is a separate store; entries never leak between them.
//! - Writes are durable once the call returns.

pub mod kv_store;
pub mod lifecycle_store;
pub mod plugin_storage;

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by durable stores.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Io(std::io::Error),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "store i/o failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted store data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// String-keyed durable store capability.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Returns whether an entry was removed.
    fn remove(&self, key: &str) -> StoreResult<bool>;
    /// Removes every entry, returning how many were dropped.
    fn clear(&self) -> StoreResult<usize>;
    /// Returns all keys in ascending order.
    fn keys(&self) -> StoreResult<Vec<String>>;
}
