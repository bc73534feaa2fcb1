use crate::store::{LossReason, StoreError};
use crate::types::LockState;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the distributed lock.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A gated operation was attempted without holding the lease.
    #[error("lock is not held")]
    NotHeld,

    /// The operation is not valid for the lock's current lifecycle state.
    #[error("operation not valid in state {0:?}")]
    InvalidState(LockState),

    /// The options given at construction are inconsistent.
    #[error("invalid lock options: {0}")]
    InvalidOptions(&'static str),

    /// The store stopped honoring the held lease. Renewal failures surface
    /// here asynchronously; callers poll `state()` or `subscribe()` to
    /// observe the loss, and any later gated operation fails with this.
    #[error("lease lost: {0}")]
    LeaseLost(LossReason),

    /// Acquisition was cancelled before the lease was obtained.
    #[error("cancelled")]
    Cancelled,

    /// Object contents could not be decoded as UTF-8 text.
    #[error("object is not valid UTF-8: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),

    /// The store reported a failure outside the lease lifecycle.
    #[error(transparent)]
    Store(#[from] StoreError),
}
