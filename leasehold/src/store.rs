//! The narrow contract this crate requires from the backing object store.
//!
//! The store is the source of truth for exclusivity: every operation that
//! must respect the lease carries the current token, and the store rejects
//! stale tokens with a conflict rather than letting the call through.

use std::{fmt, future::Future, time::Duration};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Composite name uniquely identifying the remote object guarded by a lease.
/// Opaque to the lock; only the store interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    store: String,
    container: String,
    object: String,
}

impl ResourceId {
    pub fn new(
        store: impl Into<String>,
        container: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            store: store.into(),
            container: container.into(),
            object: object.into(),
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn object(&self) -> &str {
        &self.object
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.store, self.container, self.object)
    }
}

/// Opaque proof of current lease ownership, returned by the store on acquire
/// and required on every subsequent renew, release, read and write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a held lease stopped being honored by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    /// The lease expired before a renewal landed.
    Expired,
    /// Another holder's lease now governs the resource.
    Taken,
    /// The resource no longer exists.
    Gone,
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossReason::Expired => f.write_str("lease expired"),
            LossReason::Taken => f.write_str("lease taken by another holder"),
            LossReason::Gone => f.write_str("resource no longer exists"),
        }
    }
}

/// Errors reported by the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another valid lease already governs the resource.
    #[error("resource is leased by another holder")]
    Conflict,

    /// The lease behind the presented token has expired.
    #[error("lease has expired")]
    Expired,

    /// The resource or lease no longer exists.
    #[error("resource not found")]
    NotFound,

    /// The store could not be reached or failed transiently.
    #[error("store unavailable: {0}")]
    Unavailable(anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }

    pub fn is_lease_invalid(&self) -> bool {
        matches!(self, StoreError::Expired | StoreError::NotFound)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Maps a renewal failure to the definitive loss it implies, if any.
    /// Transient failures map to `None`; the next tick retries them.
    pub fn loss_reason(&self) -> Option<LossReason> {
        match self {
            StoreError::Expired => Some(LossReason::Expired),
            StoreError::Conflict => Some(LossReason::Taken),
            StoreError::NotFound => Some(LossReason::Gone),
            StoreError::Unavailable(_) => None,
        }
    }
}

/// Capability object performing lease and data operations against one named
/// resource. Implementations wrap the actual storage client; the lock core
/// depends only on this contract.
pub trait LeaseStore: Clone + Send {
    /// Idempotently create the resource if it does not exist yet.
    fn ensure_resource(
        &mut self,
        resource: &ResourceId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Take the lease for `ttl`. Fails with `Conflict` while another valid
    /// lease governs the resource.
    fn acquire_lease(
        &mut self,
        resource: &ResourceId,
        ttl: Duration,
    ) -> impl Future<Output = StoreResult<LeaseToken>> + Send;

    /// Extend the remaining validity of a held lease.
    fn renew_lease(
        &mut self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Give the lease back. Implementations treat an already expired or
    /// absent lease as success.
    fn release_lease(
        &mut self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Read the object's contents under the lease.
    fn read_object(
        &mut self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> impl Future<Output = StoreResult<Vec<u8>>> + Send;

    /// Replace the object's contents under the lease.
    fn write_object(
        &mut self,
        resource: &ResourceId,
        token: &LeaseToken,
        contents: &[u8],
    ) -> impl Future<Output = StoreResult<()>> + Send;
}
