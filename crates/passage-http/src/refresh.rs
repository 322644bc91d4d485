//! Single-flight token refresh coordination.
//!
//! At most one refresh network call is ever in flight. The first caller to
//! hit an expired token becomes the leader and performs the refresh; every
//! caller that arrives while it runs is queued as a waiter and resolved,
//! in FIFO order, with the leader's outcome. Clearing the in-flight flag
//! and draining the queue happen under one lock acquisition, so no caller
//! can observe the gate as idle while waiters are still unresolved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, info, instrument, warn};

use passage_core::error::{AuthError, Error, StoreError, TransportError};
use passage_core::{AccessToken, RefreshToken, SessionListener, TokenPair, TokenStore};

use crate::client::HttpClient;

/// Response from the refresh endpoint.
///
/// A missing `refresh_token` field means the server rotated only the
/// access token and the old refresh token stays valid. That lets one
/// refresh token outlive many access-token rotations; preserved because
/// it is the remote API's contract.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Result of one refresh operation, shared with every waiter.
#[derive(Clone)]
enum RefreshOutcome {
    Fresh(AccessToken),
    Expired,
}

struct RefreshState {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// Guarantees single-flight refresh semantics under concurrent callers.
pub(crate) struct RefreshCoordinator {
    client: HttpClient,
    store: Arc<dyn TokenStore>,
    listener: Option<Arc<dyn SessionListener>>,
    endpoint: String,
    timeout: Duration,
    state: Mutex<RefreshState>,
    /// Orders token writes against logout. The value counts logouts; a
    /// refresh only persists its tokens if no logout happened while its
    /// network call was in flight.
    store_gate: AsyncMutex<u64>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        client: HttpClient,
        store: Arc<dyn TokenStore>,
        listener: Option<Arc<dyn SessionListener>>,
        endpoint: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            listener,
            endpoint,
            timeout,
            state: Mutex::new(RefreshState {
                refreshing: false,
                waiters: Vec::new(),
            }),
            store_gate: AsyncMutex::new(0),
        }
    }

    /// End the session on the caller's initiative.
    ///
    /// Clears the store and bumps the logout count, so a refresh whose
    /// network call is still in flight cannot persist its tokens over
    /// the cleared state. Does not signal the session listener.
    pub(crate) async fn logout(&self) -> Result<(), StoreError> {
        let mut logouts = self.store_gate.lock().await;
        *logouts += 1;
        self.store.clear().await
    }

    /// Obtain an access token that is newer than `stale`.
    ///
    /// `stale` is the token the caller just failed with. If the store
    /// already holds a different access token, a refresh completed between
    /// the caller's 401 and its arrival here; that token is returned
    /// without touching the gate, so late-arriving 401s never start a
    /// redundant second refresh.
    pub(crate) async fn ensure_fresh_token(
        &self,
        stale: Option<&AccessToken>,
    ) -> Result<AccessToken, Error> {
        if let Some(stale) = stale {
            if let Some(pair) = self.store.load().await {
                if pair.access.as_str() != stale.as_str() {
                    debug!("token already rotated, skipping refresh");
                    return Ok(pair.access);
                }
            }
        }

        let waiter = {
            let mut state = self.state.lock().unwrap();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("refresh already in flight, waiting");
            return match rx.await {
                Ok(RefreshOutcome::Fresh(token)) => Ok(token),
                // A dropped sender can only mean the refresh went down
                Ok(RefreshOutcome::Expired) | Err(_) => Err(AuthError::SessionExpired.into()),
            };
        }

        let outcome = self.refresh_once(stale).await;

        // Atomic handoff: clear the flag and resolve every queued waiter
        // under the same lock acquisition.
        {
            let mut state = self.state.lock().unwrap();
            state.refreshing = false;
            for tx in state.waiters.drain(..) {
                let _ = tx.send(outcome.clone());
            }
        }

        match outcome {
            RefreshOutcome::Fresh(token) => Ok(token),
            RefreshOutcome::Expired => Err(AuthError::SessionExpired.into()),
        }
    }

    /// Perform one refresh as the leader.
    ///
    /// Any failure, a missing refresh token included, ends the session:
    /// the store is cleared and the listener signalled exactly once.
    #[instrument(skip(self, stale))]
    async fn refresh_once(&self, stale: Option<&AccessToken>) -> RefreshOutcome {
        match self.try_refresh(stale).await {
            Ok(token) => {
                info!("session refreshed");
                RefreshOutcome::Fresh(token)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, session expired");
                self.expire_session().await;
                RefreshOutcome::Expired
            }
        }
    }

    async fn try_refresh(&self, stale: Option<&AccessToken>) -> Result<AccessToken, Error> {
        let logouts = *self.store_gate.lock().await;

        // No stored pair means no refresh token: fail without a network call
        let pair = self
            .store
            .load()
            .await
            .ok_or(AuthError::SessionExpired)?;

        // The gate can be won just after a previous leader's drain; if the
        // store moved on in that window the rotated token is the answer.
        if let Some(stale) = stale {
            if pair.access.as_str() != stale.as_str() {
                debug!("token already rotated, skipping refresh");
                return Ok(pair.access);
            }
        }

        let body = json!({ "refresh_token": pair.refresh.as_str() });
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .send(Method::POST, &self.endpoint, Some(&body), None, None),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(self.client.fail(response).await);
        }

        let value = self
            .client
            .parse_body(response)
            .await?
            .ok_or_else(|| Error::InvalidResponse("empty refresh response".into()))?;
        let refreshed: RefreshResponse =
            serde_json::from_value(value).map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let new_pair = TokenPair {
            access: AccessToken::new(refreshed.access_token),
            refresh: refreshed
                .refresh_token
                .map(RefreshToken::new)
                .unwrap_or(pair.refresh),
        };

        // Logout wins: in-flight retries still get the fresh token, but
        // it is never persisted over the cleared store.
        let gate = self.store_gate.lock().await;
        if *gate != logouts {
            debug!("logged out during refresh, not persisting tokens");
            return Ok(new_pair.access);
        }

        // Tokens stay usable in-memory even if persistence fails
        if let Err(e) = self.store.save(&new_pair).await {
            warn!(error = %e, "failed to persist refreshed tokens");
        }
        drop(gate);

        Ok(new_pair.access)
    }

    async fn expire_session(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear token store");
        }
        if let Some(listener) = &self.listener {
            listener.session_expired();
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use passage_core::ApiUrl;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);

    impl SessionListener for CountingListener {
        fn session_expired(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn coordinator(
        store: Arc<dyn TokenStore>,
        listener: Arc<CountingListener>,
    ) -> RefreshCoordinator {
        // Port 9 (discard) is never contacted in these tests
        let base = ApiUrl::new("http://127.0.0.1:9").unwrap();
        RefreshCoordinator::new(
            HttpClient::new(base),
            store,
            Some(listener),
            "/refresh".into(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_without_network_call() {
        let store = Arc::new(MemoryTokenStore::new());
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let coordinator = coordinator(store.clone(), listener.clone());

        let result = coordinator.ensure_fresh_token(None).await;

        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::SessionExpired))
        ));
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn each_expiry_event_signals_once() {
        let store = Arc::new(MemoryTokenStore::new());
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let coordinator = coordinator(store, listener.clone());

        // Two separate expiry events, one signal each
        let _ = coordinator.ensure_fresh_token(None).await;
        let _ = coordinator.ensure_fresh_token(None).await;

        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn leader_rechecks_store_before_refreshing() {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&TokenPair::new("at_new", "rt_1"))
            .await
            .unwrap();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let coordinator = coordinator(store, listener.clone());

        // Even as leader, a caller whose token was rotated while it raced
        // for the gate reuses the rotated token instead of refreshing
        let stale = AccessToken::new("at_old");
        let token = coordinator.try_refresh(Some(&stale)).await.unwrap();

        assert_eq!(token.as_str(), "at_new");
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_clears_store() {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&TokenPair::new("at_1", "rt_1"))
            .await
            .unwrap();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let coordinator = coordinator(store.clone(), listener.clone());

        coordinator.logout().await.unwrap();

        assert!(store.load().await.is_none());
        // Logout is not an expiry event
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rotated_token_is_reused_without_refresh() {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&TokenPair::new("at_new", "rt_1"))
            .await
            .unwrap();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let coordinator = coordinator(store, listener.clone());

        // Caller failed with at_old; the store already moved on to at_new
        let stale = AccessToken::new("at_old");
        let token = coordinator
            .ensure_fresh_token(Some(&stale))
            .await
            .unwrap();

        assert_eq!(token.as_str(), "at_new");
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    }
}
