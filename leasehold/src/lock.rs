//! Distributed mutual exclusion over a store-backed lease.

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{select, spawn, sync::watch, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    error::{Error, Result},
    renewer::LeaseRenewer,
    store::{LeaseStore, LeaseToken},
    types::{LockHandle, LockOptions, LockState, SharedHandle, Teardown},
};

/// A lock over one named remote resource, held as a store lease and kept
/// alive by a background renewal task.
///
/// At most one holder owns the lease at any instant; the store arbitrates
/// conflicts. A lock instance is one attempt at ownership: construct,
/// acquire, perform gated reads and writes, then `release`. Dropping the
/// lock without releasing cancels renewal promptly, leaving the lease to
/// expire server-side; explicit `release().await` remains the primary
/// teardown and is the only path that gives the lease back early.
pub struct DistributedLock<S: LeaseStore> {
    store: S,
    options: LockOptions,
    handle: SharedHandle,
    cancel: CancellationToken,
    renew_cancel: Option<CancellationToken>,
    renew_task: Option<JoinHandle<Result<()>>>,
    ensured: bool,
    rng: StdRng,
}

impl<S: LeaseStore + 'static> DistributedLock<S> {
    /// Create an unlocked lock. Acquisition loops and the renewal task stop
    /// when `cancel` (or the child token derived from it) is cancelled.
    pub fn new(cancel: CancellationToken, store: S, options: LockOptions) -> Result<Self> {
        options.validate()?;
        let handle = SharedHandle::new(options.resource.clone());
        Ok(Self {
            store,
            options,
            handle,
            cancel: cancel.child_token(),
            renew_cancel: None,
            renew_task: None,
            ensured: false,
            rng: StdRng::from_entropy(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LockState {
        self.handle.state()
    }

    /// Whether the lease is currently held.
    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    /// Snapshot of the underlying handle.
    pub fn handle(&self) -> LockHandle {
        self.handle.snapshot()
    }

    /// Observe lifecycle transitions. A transition to `LockState::Failed`
    /// reports that the lease was lost while held; renewal failures only
    /// surface here and on the next gated operation, never synchronously.
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.handle.subscribe()
    }

    /// Block until the lease is obtained. Conflicts retry after a uniformly
    /// jittered delay from the configured range; any other store error
    /// propagates without retry. Exits promptly with `Error::Cancelled` when
    /// the lock's cancellation token fires.
    #[instrument(skip_all, fields(resource = %self.options.resource), err)]
    pub async fn acquire_or_wait(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                self.handle.revert_unlocked();
                return Err(Error::Cancelled);
            }
            if self.try_acquire().await? {
                return Ok(());
            }
            let delay = self.retry_delay();
            trace!(?delay, "lease held elsewhere, waiting");
            select! {
                _ = self.cancel.cancelled() => {
                    self.handle.revert_unlocked();
                    return Err(Error::Cancelled);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Attempt exactly one acquisition. Returns `Ok(false)` on conflict
    /// without retrying; on success behaves identically to `acquire_or_wait`
    /// from that point on.
    #[instrument(skip_all, fields(resource = %self.options.resource), err)]
    pub async fn acquire_or_skip(&mut self) -> Result<bool> {
        let acquired = self.try_acquire().await?;
        if !acquired {
            self.handle.revert_unlocked();
        }
        Ok(acquired)
    }

    async fn try_acquire(&mut self) -> Result<bool> {
        match self.state() {
            LockState::Unlocked | LockState::Acquiring => {}
            state => return Err(Error::InvalidState(state)),
        }
        self.handle.set_acquiring();
        if !self.ensured {
            if let Err(err) = self.store.ensure_resource(&self.options.resource).await {
                self.handle.revert_unlocked();
                return Err(err.into());
            }
            self.ensured = true;
        }
        match self
            .store
            .acquire_lease(&self.options.resource, self.options.lease_ttl)
            .await
        {
            Ok(token) => {
                self.handle.grant(token.clone());
                info!(ttl = ?self.options.lease_ttl, "lease acquired");
                self.spawn_renewer(token);
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                debug!("lease held elsewhere");
                Ok(false)
            }
            Err(err) => {
                self.handle.revert_unlocked();
                Err(err.into())
            }
        }
    }

    /// Read the guarded object's contents. Valid only while the lease is
    /// held; the call carries the current token so a stale lease fails with
    /// a conflict at the store instead of silently succeeding.
    #[instrument(skip_all, fields(resource = %self.options.resource), err)]
    pub async fn read(&mut self) -> Result<Vec<u8>> {
        let token = self.held_token()?;
        Ok(self
            .store
            .read_object(&self.options.resource, &token)
            .await?)
    }

    /// Read the guarded object as UTF-8 text.
    pub async fn read_to_string(&mut self) -> Result<String> {
        let contents = self.read().await?;
        Ok(String::from_utf8(contents)?)
    }

    /// Replace the guarded object's contents. Same gating as `read`.
    #[instrument(skip_all, fields(resource = %self.options.resource), err)]
    pub async fn write(&mut self, contents: &[u8]) -> Result<()> {
        let token = self.held_token()?;
        Ok(self
            .store
            .write_object(&self.options.resource, &token, contents)
            .await?)
    }

    /// Stop renewal and give the lease back. Idempotent, and a no-op when
    /// the lease was never held. Never fails: an already expired or absent
    /// lease counts as released, and any other release failure is logged and
    /// left for the lease to expire server-side.
    #[instrument(skip_all, fields(resource = %self.options.resource))]
    pub async fn release(&mut self) {
        let teardown = self.handle.begin_teardown();
        if matches!(teardown, Teardown::NoOp) {
            return;
        }

        // Two-phase stop: signal the renewer, then wait for its loop to exit
        // before touching the lease. No renew call is in flight once the
        // join returns.
        if let Some(renew_cancel) = self.renew_cancel.take() {
            renew_cancel.cancel();
        }
        if let Some(task) = self.renew_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%err, "renewal task ended with error"),
                Err(err) => warn!(%err, "renewal task join failed"),
            }
        }

        if let Teardown::ReleaseLease(token) = teardown {
            match self
                .store
                .release_lease(&self.options.resource, &token)
                .await
            {
                Ok(()) => debug!("lease released"),
                Err(err) if err.is_lease_invalid() => {
                    debug!(%err, "lease already gone at release")
                }
                Err(err) => warn!(%err, "release failed, leaving lease to expire"),
            }
        }
        self.handle.finish_release();
        info!("released");
    }

    fn spawn_renewer(&mut self, token: LeaseToken) {
        let renew_cancel = self.cancel.child_token();
        let renewer = LeaseRenewer::new(
            renew_cancel.clone(),
            self.store.clone(),
            self.options.resource.clone(),
            token,
            self.options.renew_interval,
            self.handle.clone(),
        );
        self.renew_cancel = Some(renew_cancel);
        self.renew_task = Some(spawn(renewer.run()));
    }

    fn held_token(&self) -> Result<LeaseToken> {
        let handle = self.handle.snapshot();
        match handle.state() {
            LockState::Held => handle.token().cloned().ok_or(Error::NotHeld),
            LockState::Failed => Err(Error::LeaseLost(
                handle.loss().unwrap_or(crate::store::LossReason::Expired),
            )),
            _ => Err(Error::NotHeld),
        }
    }

    fn retry_delay(&mut self) -> Duration {
        let min = self.options.retry_delay_min;
        let max = self.options.retry_delay_max;
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..=max)
    }
}

impl<S: LeaseStore> Drop for DistributedLock<S> {
    fn drop(&mut self) {
        // Prompt stop for the renewal task if the caller never released. The
        // lease itself is left to expire server-side; only an awaited
        // `release` can give it back early.
        self.cancel.cancel();
    }
}
