//! Error type for storage backends.

/// Errors surfaced by [`Store`](crate::Store) implementations.
///
/// `Duplicate` and `Conflict` are semantic outcomes the caller handles
/// (replay detection, approval races); `Backend` is an unexpected failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the insert (duplicate id, name,
    /// or nonce digest).
    #[error("record already exists")]
    Duplicate,

    /// The targeted record does not exist.
    #[error("record not found")]
    Missing,

    /// The record is not in the state the operation requires (e.g. a
    /// compare-and-swap on an approval that is no longer pending).
    #[error("record is not in the expected state")]
    Conflict,

    /// The underlying backend failed.
    #[error("storage backend failure: {reason}")]
    Backend { reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::Missing,
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate,
            _ => Self::Backend {
                reason: err.to_string(),
            },
        }
    }
}
