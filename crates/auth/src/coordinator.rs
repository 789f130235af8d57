//! Cached access credentials with single-flight refresh.
//!
//! Responsibilities:
//! - Cache one access credential per refresh credential.
//! - Refresh when absent or past its deadline.
//! - Collapse concurrent refreshes for the same refresh credential into one
//!   upstream call; every waiter receives the leader's outcome.
//! - Evict on authentication failure so the next caller re-authenticates.
use kimi_bridge_types::{
    AccessCredential, BridgeError, CredentialRefresher, traits::Result,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<AccessCredential>>;

#[derive(Default)]
struct State {
    cache: HashMap<String, AccessCredential>,
    /// Present only while a refresh for the key is in flight.
    pending: HashMap<String, Vec<Waiter>>,
}

enum Role {
    Cached(AccessCredential),
    Leader,
    Follower(oneshot::Receiver<Result<AccessCredential>>),
}

impl State {
    /// Joins an in-flight refresh, or registers the caller as its leader.
    fn join_refresh(&mut self, refresh_token: &str) -> Role {
        if let Some(waiters) = self.pending.get_mut(refresh_token) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            Role::Follower(rx)
        } else {
            self.pending.insert(refresh_token.to_string(), Vec::new());
            Role::Leader
        }
    }
}

pub struct CredentialCoordinator {
    refresher: Arc<dyn CredentialRefresher>,
    state: Mutex<State>,
}

impl CredentialCoordinator {
    pub fn new(refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self {
            refresher,
            state: Mutex::new(State::default()),
        }
    }

    /// Return a usable access credential value for `refresh_token`,
    /// refreshing it first if it is absent or stale.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure if a refresh was needed and did not succeed.
    pub async fn acquire_access(&self, refresh_token: &str) -> Result<String> {
        let role = {
            let mut state = self.lock();
            match state.cache.get(refresh_token) {
                Some(cred) if !cred.needs_refresh() => Role::Cached(cred.clone()),
                _ => state.join_refresh(refresh_token),
            }
        };
        self.settle(refresh_token, role).await.map(|c| c.value)
    }

    /// Force a refresh regardless of the cached state. Joins an in-flight
    /// refresh instead of starting a second one.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential> {
        let role = self.lock().join_refresh(refresh_token);
        self.settle(refresh_token, role).await
    }

    /// Drop the cached credential so the next caller refreshes.
    pub fn evict(&self, refresh_token: &str) {
        if self.lock().cache.remove(refresh_token).is_some() {
            tracing::debug!("evicted cached access credential");
        }
    }

    /// Return a copy of the cached credential, if any.
    pub fn cached(&self, refresh_token: &str) -> Option<AccessCredential> {
        self.lock().cache.get(refresh_token).cloned()
    }

    async fn settle(&self, refresh_token: &str, role: Role) -> Result<AccessCredential> {
        match role {
            Role::Cached(cred) => Ok(cred),
            Role::Leader => self.lead_refresh(refresh_token).await,
            Role::Follower(rx) => rx.await.unwrap_or_else(|_| {
                Err(BridgeError::RequestFailed(
                    "credential refresh was abandoned".into(),
                ))
            }),
        }
    }

    async fn lead_refresh(&self, refresh_token: &str) -> Result<AccessCredential> {
        let mut guard = LeaderGuard {
            coordinator: self,
            refresh_token,
            settled: false,
        };

        tracing::debug!("refreshing access credential");
        let outcome = self.refresher.refresh(refresh_token).await;

        let waiters = {
            let mut state = self.lock();
            if let Ok(cred) = &outcome {
                state.cache.insert(refresh_token.to_string(), cred.clone());
            }
            state.pending.remove(refresh_token).unwrap_or_default()
        };
        guard.settled = true;

        match &outcome {
            Ok(_) => tracing::info!(waiters = waiters.len(), "access credential refreshed"),
            Err(e) => tracing::warn!(error = %e, waiters = waiters.len(), "access credential refresh failed"),
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the pending entry if the leader is dropped before settling, so
/// followers fail fast instead of waiting forever.
struct LeaderGuard<'a> {
    coordinator: &'a CredentialCoordinator,
    refresh_token: &'a str,
    settled: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.lock().pending.remove(self.refresh_token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kimi_bridge_types::unix_now;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts calls; sleeps so concurrent callers overlap the refresh.
    struct CountingRefresher {
        calls: AtomicUsize,
        ttl_secs: u64,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(ttl_secs: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ttl_secs,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ttl_secs: 300,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(BridgeError::AuthInvalid);
            }
            Ok(AccessCredential {
                value: format!("{refresh_token}-access-{n}"),
                refresh_at: unix_now() + self.ttl_secs,
            })
        }
    }

    fn make(refresher: &Arc<CountingRefresher>) -> Arc<CredentialCoordinator> {
        Arc::new(CredentialCoordinator::new(
            Arc::clone(refresher) as Arc<dyn CredentialRefresher>
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_single_refresh() {
        let refresher = CountingRefresher::new(300);
        let coordinator = make(&refresher);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let c = Arc::clone(&coordinator);
                tokio::spawn(async move { c.acquire_access("rt-1").await })
            })
            .collect();
        let results = futures_util::future::join_all(handles).await;

        assert_eq!(refresher.calls(), 1);
        for r in results {
            assert_eq!(r.unwrap().unwrap(), "rt-1-access-1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_credential_reused() {
        let refresher = CountingRefresher::new(300);
        let coordinator = make(&refresher);
        let a = coordinator.acquire_access("rt").await.unwrap();
        let b = coordinator.acquire_access("rt").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_credential_refreshed() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            ttl_secs: 0,
            fail: false,
        });
        let coordinator = make(&refresher);
        coordinator.acquire_access("rt").await.unwrap();
        // Force the cached deadline into the past.
        coordinator.lock().cache.get_mut("rt").unwrap().refresh_at = unix_now() - 1;
        let second = coordinator.acquire_access("rt").await.unwrap();
        assert_eq!(second, "rt-access-2");
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_forces_refresh() {
        let refresher = CountingRefresher::new(300);
        let coordinator = make(&refresher);
        coordinator.acquire_access("rt").await.unwrap();
        coordinator.evict("rt");
        assert!(coordinator.cached("rt").is_none());
        let again = coordinator.acquire_access("rt").await.unwrap();
        assert_eq!(again, "rt-access-2");
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_refresh_independently() {
        let refresher = CountingRefresher::new(300);
        let coordinator = make(&refresher);
        let (a, b) = tokio::join!(
            coordinator.acquire_access("rt-a"),
            coordinator.acquire_access("rt-b")
        );
        assert_eq!(a.unwrap(), "rt-a-access-1");
        assert!(b.unwrap().starts_with("rt-b-access-"));
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_shared_and_not_cached() {
        let refresher = CountingRefresher::failing();
        let coordinator = make(&refresher);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&coordinator);
                tokio::spawn(async move { c.acquire_access("bad").await })
            })
            .collect();
        for r in futures_util::future::join_all(handles).await {
            assert!(matches!(r.unwrap(), Err(BridgeError::AuthInvalid)));
        }
        assert_eq!(refresher.calls(), 1);
        assert!(coordinator.cached("bad").is_none());
        assert!(coordinator.lock().pending.is_empty());

        // The queue was torn down, so the next caller leads a new refresh.
        let _ = coordinator.acquire_access("bad").await;
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_leader_releases_followers() {
        let refresher = CountingRefresher::new(300);
        let coordinator = make(&refresher);

        let leader = {
            let c = Arc::clone(&coordinator);
            tokio::spawn(async move { c.acquire_access("rt").await })
        };
        tokio::task::yield_now().await;
        let follower = {
            let c = Arc::clone(&coordinator);
            tokio::spawn(async move { c.acquire_access("rt").await })
        };
        tokio::task::yield_now().await;
        leader.abort();

        let err = follower.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::RequestFailed(_)));
        assert!(coordinator.lock().pending.is_empty());
    }
}
