//! Lock configuration and handle state shared with the renewal task.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::watch;

use crate::{
    error::{Error, Result},
    store::{LeaseToken, LossReason, ResourceId},
};

/// Configuration for a distributed lock.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Remote object guarded by the lease.
    pub resource: ResourceId,

    /// Duration the store honors the lease before it expires unrenewed.
    pub lease_ttl: Duration,

    /// Cadence of background renewal. Must be shorter than `lease_ttl`, with
    /// enough margin to absorb a missed renewal or two.
    pub renew_interval: Duration,

    /// Lower bound of the jittered delay between blocked acquire attempts.
    pub retry_delay_min: Duration,

    /// Upper bound of the jittered delay between blocked acquire attempts.
    pub retry_delay_max: Duration,
}

impl LockOptions {
    /// Options with the default cadence: 60s lease renewed every 30s,
    /// acquire retries jittered between 200ms and 1s. Long-held locks with
    /// little churn may prefer a much slower retry range such as 30-60s.
    pub fn new(resource: ResourceId) -> Self {
        let lease_ttl = Duration::from_secs(60);
        Self {
            resource,
            lease_ttl,
            renew_interval: lease_ttl / 2,
            retry_delay_min: Duration::from_millis(200),
            retry_delay_max: Duration::from_millis(1000),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.lease_ttl.is_zero() {
            return Err(Error::InvalidOptions("lease_ttl must be non-zero"));
        }
        if self.renew_interval.is_zero() {
            return Err(Error::InvalidOptions("renew_interval must be non-zero"));
        }
        if self.renew_interval >= self.lease_ttl {
            return Err(Error::InvalidOptions(
                "renew_interval must be shorter than lease_ttl",
            ));
        }
        if self.retry_delay_min > self.retry_delay_max {
            return Err(Error::InvalidOptions(
                "retry_delay_min must not exceed retry_delay_max",
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a lock handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Releasing,
    Released,
    /// Renewal failed definitively while held; the lease is no longer owned.
    Failed,
}

/// One attempt at ownership of the remote lease.
#[derive(Debug, Clone)]
pub struct LockHandle {
    resource: ResourceId,
    token: Option<LeaseToken>,
    state: LockState,
    acquired_at: Option<Instant>,
    loss: Option<LossReason>,
}

impl LockHandle {
    fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            token: None,
            state: LockState::Unlocked,
            acquired_at: None,
            loss: None,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// The current lease token. Present exactly while the state is `Held` or
    /// `Releasing`.
    pub fn token(&self) -> Option<&LeaseToken> {
        self.token.as_ref()
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn acquired_at(&self) -> Option<Instant> {
        self.acquired_at
    }

    /// Why the lease was lost, once the state is `Failed`.
    pub fn loss(&self) -> Option<LossReason> {
        self.loss
    }
}

/// What `release()` has to do, decided atomically against concurrent
/// renewal-failure transitions.
pub(crate) enum Teardown {
    /// Lease is held; issue one release call with this token.
    ReleaseLease(LeaseToken),
    /// Lease already lost; clear local state and leave it to expire.
    ClearOnly,
    /// Never held or already released; nothing to do.
    NoOp,
}

/// Handle state shared between the lock and its renewal task. Mutations hold
/// a short critical section and mirror every state change into a watch
/// channel so callers can poll or await lease loss.
#[derive(Clone)]
pub(crate) struct SharedHandle {
    inner: Arc<Mutex<LockHandle>>,
    state_tx: Arc<watch::Sender<LockState>>,
}

impl SharedHandle {
    pub(crate) fn new(resource: ResourceId) -> Self {
        let (state_tx, _) = watch::channel(LockState::Unlocked);
        Self {
            inner: Arc::new(Mutex::new(LockHandle::new(resource))),
            state_tx: Arc::new(state_tx),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> LockHandle {
        self.lock().clone()
    }

    pub(crate) fn state(&self) -> LockState {
        self.lock().state
    }

    /// `Unlocked -> Acquiring`. No-op when already acquiring, so the blocking
    /// acquire loop stays in `Acquiring` between attempts.
    pub(crate) fn set_acquiring(&self) {
        let mut handle = self.lock();
        if handle.state == LockState::Unlocked {
            handle.state = LockState::Acquiring;
            drop(handle);
            self.state_tx.send_replace(LockState::Acquiring);
        }
    }

    /// `Acquiring -> Unlocked`, after a skipped or failed attempt.
    pub(crate) fn revert_unlocked(&self) {
        let mut handle = self.lock();
        if handle.state == LockState::Acquiring {
            handle.state = LockState::Unlocked;
            drop(handle);
            self.state_tx.send_replace(LockState::Unlocked);
        }
    }

    /// `Acquiring -> Held`, populating the token and acquisition time.
    pub(crate) fn grant(&self, token: LeaseToken) {
        let mut handle = self.lock();
        handle.token = Some(token);
        handle.state = LockState::Held;
        handle.acquired_at = Some(Instant::now());
        drop(handle);
        self.state_tx.send_replace(LockState::Held);
    }

    /// `Held -> Failed` on definitive renewal loss. The token is cleared so
    /// no further call can present it. No-op in any other state: a loss
    /// detected while a release is already underway stays a release.
    pub(crate) fn fail(&self, reason: LossReason) {
        let mut handle = self.lock();
        if handle.state == LockState::Held {
            handle.state = LockState::Failed;
            handle.token = None;
            handle.loss = Some(reason);
            drop(handle);
            self.state_tx.send_replace(LockState::Failed);
        }
    }

    /// Decide teardown work under one critical section.
    pub(crate) fn begin_teardown(&self) -> Teardown {
        let mut handle = self.lock();
        match handle.state {
            LockState::Held => {
                handle.state = LockState::Releasing;
                let token = handle.token.clone();
                drop(handle);
                self.state_tx.send_replace(LockState::Releasing);
                match token {
                    Some(token) => Teardown::ReleaseLease(token),
                    None => Teardown::ClearOnly,
                }
            }
            LockState::Failed => Teardown::ClearOnly,
            _ => Teardown::NoOp,
        }
    }

    /// `Releasing | Failed -> Released`, invalidating the token.
    pub(crate) fn finish_release(&self) {
        let mut handle = self.lock();
        handle.token = None;
        handle.state = LockState::Released;
        drop(handle);
        self.state_tx.send_replace(LockState::Released);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LockHandle> {
        self.inner.lock().expect("lock handle mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::Error;
    use crate::store::{LeaseToken, LossReason};
    use crate::tests::test_resource;

    #[test]
    fn test_options_validation() {
        let mut options = LockOptions::new(test_resource());
        assert!(options.validate().is_ok());

        options.renew_interval = options.lease_ttl;
        assert!(matches!(
            options.validate(),
            Err(Error::InvalidOptions(_))
        ));

        options = LockOptions::new(test_resource());
        options.retry_delay_min = Duration::from_secs(2);
        options.retry_delay_max = Duration::from_secs(1);
        assert!(matches!(
            options.validate(),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_token_present_only_while_held_or_releasing() {
        let handle = SharedHandle::new(test_resource());
        assert!(handle.snapshot().token().is_none());

        handle.set_acquiring();
        assert!(handle.snapshot().token().is_none());

        handle.grant(LeaseToken::new("lease-1"));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state(), LockState::Held);
        assert!(snapshot.token().is_some());
        assert!(snapshot.acquired_at().is_some());

        match handle.begin_teardown() {
            Teardown::ReleaseLease(token) => assert_eq!(token.as_str(), "lease-1"),
            _ => panic!("expected a release with the held token"),
        }
        assert_eq!(handle.state(), LockState::Releasing);
        assert!(handle.snapshot().token().is_some());

        handle.finish_release();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state(), LockState::Released);
        assert!(snapshot.token().is_none());
    }

    #[test]
    fn test_fail_clears_token_and_records_reason() {
        let handle = SharedHandle::new(test_resource());
        handle.set_acquiring();
        handle.grant(LeaseToken::new("lease-1"));

        handle.fail(LossReason::Expired);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state(), LockState::Failed);
        assert!(snapshot.token().is_none());
        assert_eq!(snapshot.loss(), Some(LossReason::Expired));

        // A loss observed mid-release does not disturb the release.
        let handle = SharedHandle::new(test_resource());
        handle.set_acquiring();
        handle.grant(LeaseToken::new("lease-2"));
        let _ = handle.begin_teardown();
        handle.fail(LossReason::Taken);
        assert_eq!(handle.state(), LockState::Releasing);
    }
}
