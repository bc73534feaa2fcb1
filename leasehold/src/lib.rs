//! Distributed mutual exclusion backed by object-store leases.
//!
//! A `DistributedLock` contends for exclusive access to one named remote
//! resource through the narrow `LeaseStore` contract: acquire with conflict
//! detection, periodic renewal, release, and token-gated reads and writes.
//! The store is the source of truth for exclusivity; this crate provides the
//! lease lifecycle engine around it.

mod error;
mod lock;
mod renewer;
mod store;
mod types;

pub use error::{Error, Result};
pub use lock::DistributedLock;
pub use store::{LeaseStore, LeaseToken, LossReason, ResourceId, StoreError, StoreResult};
pub use types::{LockHandle, LockOptions, LockState};

#[cfg(test)]
pub mod tests;
