//! Error taxonomy for store operations

/// Errors surfaced by [`crate::Mailstore`] operations
///
/// Every mutating operation is all-or-nothing: any of these errors from a
/// multi-row mutation means the whole unit was rolled back.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be opened, read, or written.
    ///
    /// Fatal to the calling operation; the store never retries internally.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A uniqueness or foreign-key constraint was breached
    /// (e.g. duplicate username, email referencing a missing user).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Lookup by id, uuid, or token matched no row.
    #[error("not found")]
    NotFound,

    /// The write would push the user past their storage ceiling.
    ///
    /// Not retryable; nothing was persisted.
    #[error("quota exceeded: {used} used + {incoming} incoming > {max} max")]
    QuotaExceeded { used: i64, incoming: i64, max: i64 },

    /// A session token exists but is past its expiry.
    ///
    /// Callers of `validate_session` never observe this variant; it is
    /// collapsed with `NotFound` into a plain "not valid" so the two cases
    /// stay indistinguishable from outside.
    #[error("session expired")]
    Expired,
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| e.to_string()),
                )
            }
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            _ => StoreError::StorageUnavailable(err.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

impl From<rusqlite_migration::Error> for StoreError {
    fn from(err: rusqlite_migration::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_failure_maps_to_constraint_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE)").unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('x')", []).unwrap();

        let err: StoreError = conn
            .execute("INSERT INTO t (v) VALUES ('x')", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::NotFound));
    }
}
