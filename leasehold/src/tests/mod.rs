
pub use stub_store::StubStore;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crate::store::{LeaseToken, ResourceId, StoreError, StoreResult};

pub fn test_resource() -> ResourceId {
    ResourceId::new("teststore", "locks", "slot.lck")
}

struct Holding {
    token: String,
    expires_at: Instant,
    ttl: Duration,
}

/// In-memory single-lease semantics, shared by contending stub stores in
/// mutual-exclusion scenarios.
pub struct LeaseTable {
    state: Mutex<Option<Holding>>,
    counter: AtomicU64,
}

impl LeaseTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(None),
            counter: AtomicU64::new(0),
        })
    }

    pub fn acquire(&self, ttl: Duration) -> StoreResult<LeaseToken> {
        let mut state = self.state.lock().unwrap();
        if let Some(holding) = state.as_ref() {
            if holding.expires_at > Instant::now() {
                return Err(StoreError::Conflict);
            }
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("lease-{n}");
        *state = Some(Holding {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
            ttl,
        });
        Ok(LeaseToken::new(token))
    }

    pub fn renew(&self, token: &LeaseToken) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.as_mut() {
            Some(holding) if holding.token == token.as_str() => {
                if holding.expires_at <= Instant::now() {
                    *state = None;
                    Err(StoreError::Expired)
                } else {
                    holding.expires_at = Instant::now() + holding.ttl;
                    Ok(())
                }
            }
            Some(_) => Err(StoreError::Conflict),
            None => Err(StoreError::NotFound),
        }
    }

    pub fn release(&self, token: &LeaseToken) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if matches!(state.as_ref(), Some(holding) if holding.token == token.as_str()) {
            *state = None;
        }
        // An expired or absent lease counts as released.
        Ok(())
    }

    pub fn holder(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|holding| holding.token.clone())
    }
}

/// A stub store backed by a shared lease table, with panicking defaults for
/// the data operations.
pub fn lease_table_store(table: Arc<LeaseTable>) -> StubStore {
    let mut store = StubStore::new();
    store.ensure_resource_result = Arc::new(Mutex::new(|_resource: &ResourceId| Ok(())));
    {
        let table = table.clone();
        store.acquire_lease_result = Arc::new(Mutex::new(
            move |_resource: &ResourceId, ttl: Duration| table.acquire(ttl),
        ));
    }
    {
        let table = table.clone();
        store.renew_lease_result = Arc::new(Mutex::new(
            move |_resource: &ResourceId, token: &LeaseToken| table.renew(token),
        ));
    }
    {
        let table = table.clone();
        store.release_lease_result = Arc::new(Mutex::new(
            move |_resource: &ResourceId, token: &LeaseToken| table.release(token),
        ));
    }
    store
}
