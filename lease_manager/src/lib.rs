// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Distributed mutual exclusion over a pool of session IDs.
//!
//! Grants at most one worker exclusive use of a given session at a time. A local cache of
//! `{session_id: locked/free}` is reconciled by three inputs: this manager's own
//! `acquire`/`release`/`refresh` calls, KV-watch events forwarded by the task router, and an
//! explicit reload triggered whenever `refresh` observes that its cached revision is stale.
//! All three share one `parking_lot::Mutex`-guarded state map, matching the
//! mutex-plus-watch-channel idiom the teacher uses for its own worker/lease bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lease_gateway::{KvEvent, KvGateway, KvGatewayError, KvOp};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

pub type SessionId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LocalState {
    locked: bool,
    version: Option<u64>,
}

impl LocalState {
    fn free() -> Self {
        LocalState {
            locked: false,
            version: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseManagerError {
    /// No session became free before the caller's deadline elapsed.
    Timeout,
    /// The gateway reported something other than a clean CAS failure.
    Gateway(String),
}

impl std::fmt::Display for LeaseManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseManagerError::Timeout => write!(f, "timed out waiting for a free session"),
            LeaseManagerError::Gateway(msg) => write!(f, "lease gateway error: {msg}"),
        }
    }
}

impl std::error::Error for LeaseManagerError {}

/// Interval between retries of the random-selection acquire loop inside `session()`.
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

struct Inner {
    gateway: Arc<dyn KvGateway>,
    prefix: String,
    instance_id: String,
    ttl: Duration,
    state: Mutex<HashMap<SessionId, LocalState>>,
}

/// Tracks which sessions in a fixed pool are currently held, and by whom, via a replicated
/// KV store. See SPEC_FULL §4.2 for the full contract.
#[derive(Clone)]
pub struct SessionLeaseManager {
    inner: Arc<Inner>,
}

impl SessionLeaseManager {
    pub fn new(gateway: Arc<dyn KvGateway>, prefix: String, instance_id: String, ttl: Duration) -> Self {
        SessionLeaseManager {
            inner: Arc::new(Inner {
                gateway,
                prefix,
                instance_id,
                ttl,
                state: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn key_for(&self, session_id: SessionId) -> String {
        format!("{}{}", self.inner.prefix, session_id)
    }

    fn session_id_from_key(&self, key: &str) -> Option<SessionId> {
        key.strip_prefix(&self.inner.prefix)?.parse().ok()
    }

    /// Attempts to lock a single session. Returns `true` iff this call won the lock.
    pub async fn acquire(&self, session_id: SessionId) -> bool {
        let key = self.key_for(session_id);
        match self
            .inner
            .gateway
            .create(&key, self.inner.instance_id.as_bytes())
            .await
        {
            Ok(revision) => {
                self.inner.state.lock().insert(
                    session_id,
                    LocalState {
                        locked: true,
                        version: Some(revision),
                    },
                );
                metrics::counter!("crawler_lease_acquired_total", 1);
                true
            }
            Err(KvGatewayError::AlreadyExists(_)) => {
                self.inner.state.lock().insert(
                    session_id,
                    LocalState {
                        locked: true,
                        version: None,
                    },
                );
                false
            }
            Err(err) => {
                log::warn!("acquire({session_id}) gateway error, treating as not-acquired: {err}");
                false
            }
        }
    }

    /// Releases a held session. Idempotent: releasing a session this process does not hold
    /// is a no-op other than a local state update.
    pub async fn release(&self, session_id: SessionId) {
        let key = self.key_for(session_id);
        if let Err(err) = self.inner.gateway.purge(&key).await {
            log::warn!("release({session_id}) gateway error, continuing: {err}");
        }
        self.inner.state.lock().insert(session_id, LocalState::free());
        metrics::counter!("crawler_lease_released_total", 1);
    }

    /// Refreshes a held lease's TTL via CAS on the cached revision. On `sequence-mismatch`
    /// (someone else holds the key now, or it expired and was recreated), triggers a full
    /// reload of local state from the gateway.
    pub async fn refresh(&self, session_id: SessionId) {
        let expected = self.inner.state.lock().get(&session_id).and_then(|s| s.version);
        let Some(expected) = expected else {
            log::debug!("refresh({session_id}) called with no cached revision, skipping");
            return;
        };

        let key = self.key_for(session_id);
        match self
            .inner
            .gateway
            .update(&key, self.inner.instance_id.as_bytes(), expected)
            .await
        {
            Ok(revision) => {
                self.inner.state.lock().insert(
                    session_id,
                    LocalState {
                        locked: true,
                        version: Some(revision),
                    },
                );
            }
            Err(KvGatewayError::SequenceMismatch { .. }) => {
                log::warn!("refresh({session_id}) observed stale revision, reloading state");
                if let Err(err) = self.reload().await {
                    log::error!("reload after sequence-mismatch failed: {err}");
                }
            }
            Err(KvGatewayError::NotFound(_)) => {
                self.inner.state.lock().insert(session_id, LocalState::free());
            }
            Err(err) => {
                log::warn!("refresh({session_id}) gateway error, continuing: {err}");
            }
        }
    }

    /// Re-derives local state for every key under this manager's prefix from the gateway's
    /// authoritative view. Listed keys are locked (at the listed revision); previously-known
    /// sessions not listed are free.
    async fn reload(&self) -> Result<(), KvGatewayError> {
        let listed = self.inner.gateway.list(&self.inner.prefix).await?;

        let mut locked_ids = HashMap::new();
        for key in &listed {
            if let Some(session_id) = self.session_id_from_key(key) {
                if let Some(revision) = self.inner.gateway.get_revision(key).await? {
                    locked_ids.insert(session_id, revision);
                }
            }
        }

        let mut state = self.inner.state.lock();
        let known: Vec<SessionId> = state.keys().copied().collect();
        for session_id in known {
            match locked_ids.get(&session_id) {
                Some(revision) => {
                    state.insert(
                        session_id,
                        LocalState {
                            locked: true,
                            version: Some(*revision),
                        },
                    );
                }
                None => {
                    state.insert(session_id, LocalState::free());
                }
            }
        }
        for (session_id, revision) in locked_ids {
            state.entry(session_id).or_insert(LocalState {
                locked: true,
                version: Some(revision),
            });
        }
        Ok(())
    }

    /// Applies a watch event forwarded by the task router's KV subscription.
    pub fn on_watch_event(&self, event: &KvEvent) {
        let Some(session_id) = self.session_id_from_key(&event.key) else {
            return;
        };
        let new_state = match event.op {
            KvOp::Put => LocalState {
                locked: true,
                version: Some(event.revision),
            },
            KvOp::Purge => LocalState::free(),
        };
        self.inner.state.lock().insert(session_id, new_state);
    }

    /// Reconciles the set of known session IDs against an externally-sourced list (e.g. the
    /// session directory's full roster). IDs not previously known are added as free. IDs no
    /// longer present are removed only if locally free — a locked "ghost" entry is left in
    /// place so an in-flight lease is never silently dropped from local bookkeeping.
    pub fn update_resources(&self, known_ids: &[SessionId]) {
        let known: std::collections::HashSet<SessionId> = known_ids.iter().copied().collect();
        let mut state = self.inner.state.lock();
        for session_id in &known {
            state.entry(*session_id).or_insert_with(LocalState::free);
        }
        state.retain(|session_id, local| known.contains(session_id) || local.locked);
    }

    fn free_session_ids(&self) -> Vec<SessionId> {
        self.inner
            .state
            .lock()
            .iter()
            .filter(|(_, s)| !s.locked)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Acquires an arbitrary currently-free session, retrying with random selection until one
    /// succeeds or `timeout` elapses. Returns a guard that releases the lease (and stops the
    /// auto-refresher) on drop.
    pub async fn session(&self, timeout: Duration) -> Result<LeaseGuard, LeaseManagerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut candidates = self.free_session_ids();
            candidates.shuffle(&mut rand::thread_rng());
            for session_id in candidates {
                if self.acquire(session_id).await {
                    return Ok(self.guard_for(session_id));
                }
            }

            if Instant::now() >= deadline {
                return Err(LeaseManagerError::Timeout);
            }
            sleep(ACQUIRE_RETRY_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }

    /// Acquires a specific session by ID (the "sticky" path: a subscribed session for a
    /// channel is preferred over a random one). Returns `None` if it is currently held.
    pub async fn acquire_specific(&self, session_id: SessionId) -> Option<LeaseGuard> {
        if self.acquire(session_id).await {
            Some(self.guard_for(session_id))
        } else {
            None
        }
    }

    fn guard_for(&self, session_id: SessionId) -> LeaseGuard {
        let manager = self.clone();
        let refresh_interval = self.inner.ttl / 2;
        let refresher = tokio::spawn(async move {
            loop {
                tokio::time::sleep(refresh_interval).await;
                manager.refresh(session_id).await;
            }
        });
        LeaseGuard {
            manager: self.clone(),
            session_id,
            refresher: Some(refresher),
        }
    }
}

/// Holds a session lease. Releasing is automatic on drop; the background auto-refresher
/// (refreshing at `ttl/2`) is tied to this guard's lifetime, matching the teacher's pattern
/// of scoping background upkeep tasks to the lifetime of the resource they maintain.
pub struct LeaseGuard {
    manager: SessionLeaseManager,
    session_id: SessionId,
    refresher: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.refresher.take() {
            handle.abort();
        }
        let manager = self.manager.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            manager.release(session_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use lease_gateway::testutil::InMemoryKvGateway;

    use super::*;

    fn manager(gateway: Arc<InMemoryKvGateway>, instance: &str) -> SessionLeaseManager {
        SessionLeaseManager::new(gateway, "lease.".to_owned(), instance.to_owned(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn two_workers_race_for_one_session() {
        let gateway = Arc::new(InMemoryKvGateway::new());
        let a = manager(gateway.clone(), "worker-a");
        let b = manager(gateway.clone(), "worker-b");

        assert!(a.acquire(7).await);
        assert!(!b.acquire(7).await);

        a.release(7).await;
        assert!(b.acquire(7).await);
    }

    #[tokio::test]
    async fn update_resources_keeps_locked_ghost_entries() {
        let gateway = Arc::new(InMemoryKvGateway::new());
        let mgr = manager(gateway, "worker-a");
        mgr.update_resources(&[1, 2, 3]);
        assert!(mgr.acquire(2).await);

        // Session 2 removed from the directory roster while held.
        mgr.update_resources(&[1, 3]);

        let free = mgr.free_session_ids();
        assert!(!free.contains(&2));
        assert!(free.contains(&1));
        assert!(free.contains(&3));
    }

    #[tokio::test]
    async fn reload_after_sequence_mismatch_picks_up_other_holder() {
        let gateway = Arc::new(InMemoryKvGateway::new());
        let a = manager(gateway.clone(), "worker-a");
        let b = manager(gateway.clone(), "worker-b");

        a.update_resources(&[1]);
        b.update_resources(&[1]);

        assert!(a.acquire(1).await);

        // Simulate the lease expiring out from under `a` (TTL elapses) and `b` taking it
        // over before `a` ever learns about it.
        gateway.force_remove("lease.1");
        assert!(b.acquire(1).await);

        // `a` still holds a cached revision from before the expiry; refreshing observes a
        // sequence mismatch (the key now exists at a different revision) and reloads,
        // discovering the session is held by someone else.
        a.refresh(1).await;
        assert!(!a.free_session_ids().contains(&1));
    }
}
