//! Error types for `clavum-core`.
//!
//! `CryptoError` is deliberately opaque: tag mismatches, invalid points,
//! wrong key lengths, and bad signatures all collapse into one kind with
//! no detail, so nothing downstream can distinguish them. The HTTP edge
//! coarsens it further to BadRequest or InternalError.

use clavum_storage::models::ApprovalStatus;
use clavum_storage::StoreError;

/// A cryptographic primitive failed. Carries no cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cryptographic operation failed")]
pub struct CryptoError;

/// Errors from the approval state machine.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// The approval record does not exist.
    #[error("approval not found")]
    NotFound,

    /// The approval already reached a terminal status — a concurrent
    /// approve, reject, or expiry won.
    #[error("approval already resolved as {0}")]
    AlreadyResolved(ApprovalStatus),

    /// The approval's deadline passed; it has been lazily expired.
    #[error("approval expired")]
    Expired,

    /// The submitted signature does not verify against the challenge.
    /// The record remains pending.
    #[error("approval signature is invalid")]
    InvalidSignature,

    /// The storage backend failed.
    #[error("approval storage error: {0}")]
    Store(#[from] StoreError),
}
