//! The gateway: the single entry point through which every API call passes.
//!
//! Callers hand a request to [`Gateway::execute`] and get back structured
//! data or a classified error; they never touch tokens. Authentication
//! recovery is automatic and bounded: one 401 triggers one refresh and one
//! retry, never more.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, IntoHeaderName};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use passage_core::error::Error;
use passage_core::{
    AccessToken, ApiUrl, Credentials, Result, SessionListener, StoreError, TokenPair, TokenStore,
};

use crate::client::HttpClient;
use crate::refresh::RefreshCoordinator;
use crate::store::MemoryTokenStore;

const DEFAULT_LOGIN_ENDPOINT: &str = "/login";
const DEFAULT_REFRESH_ENDPOINT: &str = "/refresh";

/// A hung refresh call holds the single-flight gate and stalls every
/// queued waiter, so the refresh round trip is always bounded.
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from the login endpoint.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    user: Option<Value>,
}

/// One logical API call: method, endpoint, optional body and headers.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    endpoint: String,
    body: Option<Value>,
    headers: HeaderMap,
}

impl ApiRequest {
    /// Create a request for the given method and endpoint path.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Shorthand for a GET request.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// Shorthand for a POST request.
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// Shorthand for a PUT request.
    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    /// Shorthand for a DELETE request.
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Attach a JSON body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach an extra header.
    pub fn header(mut self, name: impl IntoHeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// The authenticated API gateway.
///
/// Cheap to clone (internal `Arc`) and safe to share across tasks; many
/// requests may be in flight at once. Requests that never see a 401
/// proceed fully independently, with no shared lock on the happy path.
///
/// # Example
///
/// ```no_run
/// use passage_http::{ApiRequest, Gateway};
/// use passage_core::{ApiUrl, Credentials};
///
/// # async fn example() -> passage_core::Result<()> {
/// let api = ApiUrl::new("https://api.example.com/api")?;
/// let gateway = Gateway::new(api);
///
/// let user = gateway.login(Credentials::new("alice@example.com", "pw")).await?;
/// let conversations = gateway.execute(ApiRequest::get("/conversations")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    client: HttpClient,
    store: Arc<dyn TokenStore>,
    coordinator: RefreshCoordinator,
    login_endpoint: String,
}

impl Gateway {
    /// Create a gateway with default configuration (in-memory store,
    /// no session listener).
    pub fn new(base: ApiUrl) -> Self {
        Self::builder(base).build()
    }

    /// Start configuring a gateway.
    pub fn builder(base: ApiUrl) -> GatewayBuilder {
        GatewayBuilder {
            base,
            store: None,
            listener: None,
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            refresh_endpoint: DEFAULT_REFRESH_ENDPOINT.to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Returns the API base URL this gateway talks to.
    pub fn base(&self) -> &ApiUrl {
        self.inner.client.base()
    }

    /// Execute one logical API call.
    ///
    /// The current access token (if any) is attached as a bearer
    /// credential; with no token the call goes out unauthenticated. On a
    /// 401 the gateway refreshes the session once and retries once with
    /// the fresh token. 403, 5xx, and everything else surface directly as
    /// classified errors without retry.
    ///
    /// An empty response body yields `Ok(None)`; a body that is not valid
    /// JSON yields [`Error::InvalidResponse`].
    #[instrument(skip(self, request), fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn execute(&self, request: ApiRequest) -> Result<Option<Value>> {
        // Original call plus one retry after a successful refresh. Never
        // a third, even against a server that answers 401 to everything.
        const MAX_ATTEMPTS: u8 = 2;

        let mut fresh: Option<AccessToken> = None;
        let mut attempt = 0u8;

        loop {
            attempt += 1;
            let token = match fresh.clone() {
                Some(token) => Some(token),
                None => self.inner.store.load().await.map(|pair| pair.access),
            };

            let response = self
                .inner
                .client
                .send(
                    request.method.clone(),
                    &request.endpoint,
                    request.body.as_ref(),
                    Some(&request.headers),
                    token.as_ref(),
                )
                .await?;

            let status = response.status();
            if status.is_success() {
                return self.inner.client.parse_body(response).await;
            }

            if status == StatusCode::UNAUTHORIZED && attempt < MAX_ATTEMPTS {
                debug!(attempt, "token rejected, refreshing session");
                fresh = Some(
                    self.inner
                        .coordinator
                        .ensure_fresh_token(token.as_ref())
                        .await?,
                );
                continue;
            }

            return Err(self.inner.client.fail(response).await);
        }
    }

    /// GET the given endpoint.
    pub async fn get(&self, endpoint: &str) -> Result<Option<Value>> {
        self.execute(ApiRequest::get(endpoint)).await
    }

    /// POST a JSON body to the given endpoint.
    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Option<Value>> {
        self.execute(ApiRequest::post(endpoint).body(body)).await
    }

    /// PUT a JSON body to the given endpoint.
    pub async fn put(&self, endpoint: &str, body: Value) -> Result<Option<Value>> {
        self.execute(ApiRequest::put(endpoint).body(body)).await
    }

    /// DELETE the given endpoint.
    pub async fn delete(&self, endpoint: &str) -> Result<Option<Value>> {
        self.execute(ApiRequest::delete(endpoint)).await
    }

    /// Authenticate and store the returned token pair.
    ///
    /// Returns the user object from the login response. Login never
    /// enters the 401 refresh path; a rejected login surfaces as
    /// [`AuthError::Unauthenticated`](passage_core::AuthError::Unauthenticated).
    #[instrument(skip(self, credentials), fields(email = %credentials.email()))]
    pub async fn login(&self, credentials: Credentials) -> Result<Value> {
        info!("creating session");

        let body = json!({
            "email": credentials.email(),
            "password": credentials.password(),
        });
        let response = self
            .inner
            .client
            .send(
                Method::POST,
                &self.inner.login_endpoint,
                Some(&body),
                None,
                None,
            )
            .await?;

        if !response.status().is_success() {
            return Err(self.inner.client.fail(response).await);
        }

        let value = self
            .inner
            .client
            .parse_body(response)
            .await?
            .ok_or_else(|| Error::InvalidResponse("empty login response".into()))?;
        let session: LoginResponse =
            serde_json::from_value(value).map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let pair = TokenPair::new(session.access_token, session.refresh_token);
        if let Err(e) = self.inner.store.save(&pair).await {
            warn!(error = %e, "failed to persist session tokens");
        }

        debug!("session created");
        Ok(session.user.unwrap_or(Value::Null))
    }

    /// Drop the stored token pair. Idempotent.
    ///
    /// Does not signal the session listener: logout is the caller's own
    /// decision, not an expiry event. A logout issued while a refresh is
    /// in flight wins: in-flight requests complete, but the refreshed
    /// tokens are not persisted over the cleared store.
    pub async fn logout(&self) -> std::result::Result<(), StoreError> {
        self.inner.coordinator.logout().await
    }

    /// Whether a token pair is currently stored.
    pub async fn authenticated(&self) -> bool {
        self.inner.store.load().await.is_some()
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("base", self.inner.client.base())
            .finish()
    }
}

/// Configures and builds a [`Gateway`].
pub struct GatewayBuilder {
    base: ApiUrl,
    store: Option<Arc<dyn TokenStore>>,
    listener: Option<Arc<dyn SessionListener>>,
    login_endpoint: String,
    refresh_endpoint: String,
    refresh_timeout: Duration,
}

impl GatewayBuilder {
    /// Inject a token store. Defaults to [`MemoryTokenStore`].
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Inject a session listener to be signalled on session expiry.
    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Override the login endpoint path (default `/login`).
    pub fn login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = endpoint.into();
        self
    }

    /// Override the refresh endpoint path (default `/refresh`).
    pub fn refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.refresh_endpoint = endpoint.into();
        self
    }

    /// Bound the refresh round trip (default 30 seconds). On expiry the
    /// refresh counts as failed and every waiter sees `SessionExpired`.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Gateway {
        let client = HttpClient::new(self.base);
        let store: Arc<dyn TokenStore> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let coordinator = RefreshCoordinator::new(
            client.clone(),
            store.clone(),
            self.listener,
            self.refresh_endpoint,
            self.refresh_timeout,
        );

        Gateway {
            inner: Arc::new(GatewayInner {
                client,
                store,
                coordinator,
                login_endpoint: self.login_endpoint,
            }),
        }
    }
}
