//! Background renewal of a held lease.

use std::time::Duration;

use tokio::{
    select,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{
    error::{Error, Result},
    store::{LeaseStore, LeaseToken, ResourceId},
    types::SharedHandle,
};

/// Periodic task that keeps a held lease alive. One renewer exists per
/// successful acquisition, started the moment the lease is granted.
///
/// The loop checks its cancellation token at the top of every wait, so a
/// stop is always graceful: once `run` returns, no further renew call will
/// be issued. On definitive loss of the lease the renewer marks the shared
/// handle `Failed` and exits; it never issues a release call itself, that
/// stays with the owning lock.
pub(crate) struct LeaseRenewer<S: LeaseStore> {
    cancel: CancellationToken,
    store: S,
    resource: ResourceId,
    token: LeaseToken,
    renew_interval: Duration,
    handle: SharedHandle,
}

impl<S: LeaseStore> LeaseRenewer<S> {
    pub(crate) fn new(
        cancel: CancellationToken,
        store: S,
        resource: ResourceId,
        token: LeaseToken,
        renew_interval: Duration,
        handle: SharedHandle,
    ) -> Self {
        Self {
            cancel,
            store,
            resource,
            token,
            renew_interval,
            handle,
        }
    }

    #[tracing::instrument(skip_all, fields(resource = %self.resource))]
    pub(crate) async fn run(mut self) -> Result<()> {
        let mut ticks = interval(self.renew_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First renewal is due one full interval after acquisition.
        ticks.reset();
        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    trace!("renewal stopped");
                    return Ok(());
                }
                _ = ticks.tick() => {
                    match self.store.renew_lease(&self.resource, &self.token).await {
                        Ok(()) => {
                            trace!("lease renewed");
                        }
                        Err(err) => match err.loss_reason() {
                            Some(reason) => {
                                warn!(%err, "lease lost");
                                self.handle.fail(reason);
                                return Err(Error::LeaseLost(reason));
                            }
                            None => {
                                // The ttl margin over the renew interval
                                // absorbs a bounded run of these.
                                warn!(%err, "renewal failed, retrying next tick");
                            }
                        },
                    }
                }
            }
        }
    }
}
