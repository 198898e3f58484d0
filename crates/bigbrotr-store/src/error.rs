//! Storage error classification (§4.1, §7).
//!
//! Ported from `chem-persistence::error::PersistenceError`'s
//! `From<DieselError>` classification match, generalized from Diesel's
//! `DatabaseErrorKind` to Postgres SQLSTATE codes read directly off
//! `sqlx::Error` so the same classification works whether the failure came
//! from a hand-written query or the `UNNEST`-based bulk procedures.

use bigbrotr_core::{ErrorKind, TypedError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Pool acquire timeout, connection refused, broken connection.
    #[error("transient storage error: {0}")]
    Transient(String),
    /// Constraint, type, or syntax error. Never retried.
    #[error("permanent storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Transient(_) => ErrorKind::TransientDb,
            StorageError::Permanent(_) => ErrorKind::PermanentDb,
        }
    }
}

impl TypedError for StorageError {
    fn kind(&self) -> ErrorKind {
        StorageError::kind(self)
    }
}

/// SQLSTATE classes that indicate a transient condition worth retrying:
/// connection failures (08*), serialization/deadlock (40001, 40P01), and
/// insufficient resources (53*).
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("53") || code == "40001" || code == "40P01"
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if is_transient_sqlstate(&code) => StorageError::Transient(err.to_string()),
                _ => StorageError::Permanent(err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::Transient(err.to_string())
            }
            _ => StorageError::Permanent(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_sqlstate_prefixes_are_recognized() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("53300"));
        assert!(is_transient_sqlstate("40001"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(!is_transient_sqlstate("23505"));
    }
}
