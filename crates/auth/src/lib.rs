//! VENTU session management for Rust
//!
//! This crate owns the credential pair issued by the VENTU API, decides when
//! the access token is stale and refreshes it at most once per staleness
//! event, no matter how many concurrent requests observe it.
//!
//! ```no_run
//! # async fn run() -> Result<(), ventu_rust_auth::AuthError> {
//! use ventu_rust_auth::{AuthOptions, SessionManager};
//!
//! let auth = SessionManager::new(
//!     "https://api.ventu.example/api",
//!     reqwest::Client::new(),
//!     AuthOptions::default(),
//! );
//! auth.sign_in("ana@example.com", "secret").await?;
//! let token = auth.get_valid_access_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

mod claims;
mod coordinator;
mod error;
pub mod storage;
mod types;

use log::{debug, info, warn};
use reqwest::Client;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use url::Url;

use crate::claims::{needs_refresh, preview};

pub use claims::AccessClaims;
pub use coordinator::{Join, RefreshCoordinator, RefreshOutcome};
pub use error::{error_message, AuthError};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
pub use types::*;

/// Login endpoint
pub const LOGIN_PATH: &str = "/token/";
/// Refresh endpoint
pub const REFRESH_PATH: &str = "/token/refresh/";
/// Current user profile endpoint
pub const PROFILE_PATH: &str = "/users/me/";
/// Registration endpoint
pub const REGISTER_PATH: &str = "/users/register/";
/// Storage key of the persisted credential pair
pub const DEFAULT_STORAGE_KEY: &str = "authTokens";

/// Session manager options
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Write the credential pair to storage
    pub persist_session: bool,
    /// Key the credential pair is stored under
    pub storage_key: String,
    /// Upper bound for one refresh call; `None` waits forever
    pub refresh_timeout: Option<Duration>,
    /// Treat tokens as expired this long before `exp`
    pub expiry_leeway: Duration,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            persist_session: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            refresh_timeout: Some(Duration::from_secs(10)),
            expiry_leeway: Duration::ZERO,
        }
    }
}

impl AuthOptions {
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    pub fn with_storage_key(mut self, value: &str) -> Self {
        self.storage_key = value.to_string();
        self
    }

    pub fn with_refresh_timeout(mut self, value: Option<Duration>) -> Self {
        self.refresh_timeout = value;
        self
    }

    pub fn with_expiry_leeway(mut self, value: Duration) -> Self {
        self.expiry_leeway = value;
        self
    }
}

/// A request that came back with 401, as seen by the HTTP layer
#[derive(Debug, Clone)]
pub struct FailedRequest {
    /// Absolute URL of the request
    pub url: String,
    /// Access token the request was sent with
    pub access_token: Option<String>,
    /// Whether this was already the replay after a refresh
    pub retried: bool,
}

impl FailedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
            retried: false,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_retried(mut self, retried: bool) -> Self {
        self.retried = retried;
        self
    }
}

/// Owns the session and coordinates token refreshes.
///
/// Cloning is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    http_client: Client,
    options: AuthOptions,
    storage: Arc<dyn TokenStorage>,
    session: RwLock<Option<Session>>,
    /// Serializes every change to the persisted pair and the in-memory
    /// session so a late refresh cannot overwrite a logout.
    write_lock: tokio::sync::Mutex<()>,
    coordinator: RefreshCoordinator,
}

impl SessionManager {
    /// Create a session manager backed by in-memory storage
    pub fn new(url: &str, http_client: Client, options: AuthOptions) -> Self {
        Self::with_storage(url, http_client, Arc::new(MemoryStorage::new()), options)
    }

    /// Create a session manager over the given storage backend
    pub fn with_storage(
        url: &str,
        http_client: Client,
        storage: Arc<dyn TokenStorage>,
        options: AuthOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.trim_end_matches('/').to_string(),
                http_client,
                options,
                storage,
                session: RwLock::new(None),
                write_lock: tokio::sync::Mutex::new(()),
                coordinator: RefreshCoordinator::new(),
            }),
        }
    }

    pub fn options(&self) -> &AuthOptions {
        &self.inner.options
    }

    /// Absolute URL for an API path
    pub fn endpoint(&self, path: &str) -> String {
        self.inner.endpoint(path)
    }

    /// Sign in with email and password via `POST /token/`
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let url = self.inner.endpoint(LOGIN_PATH);
        let credentials = SignInCredentials {
            email: email.to_string(),
            password: password.to_string(),
        };

        debug!("Signing in {}", email);
        let response = self
            .inner
            .http_client
            .post(&url)
            .json(&credentials)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::api(status.as_u16(), &error_text));
        }

        let body: TokenResponse = response.json().await?;
        let tokens = match (body.access, body.refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                AuthTokens::new(access, refresh)
            }
            _ => {
                return Err(AuthError::InvalidResponse(
                    "login response does not contain both access and refresh tokens".into(),
                ))
            }
        };

        self.login(tokens).await
    }

    /// Store a freshly issued credential pair and resolve the user.
    ///
    /// The pair is persisted before the profile is requested. A failing
    /// profile request does not undo the login; the user is rebuilt from the
    /// access token claims instead.
    pub async fn login(&self, tokens: AuthTokens) -> Result<Session, AuthError> {
        self.inner.install(&tokens).await?;
        info!("Logged in with token {}", preview(&tokens.access));

        let user = self.inner.resolve_user(&tokens.access).await;
        self.inner.store_user_for(&tokens.refresh, user);

        self.session().ok_or(AuthError::Unauthenticated)
    }

    /// Register a new account via `POST /users/register/`.
    ///
    /// Registration does not log the user in.
    pub async fn register(
        &self,
        registration: &Registration,
    ) -> Result<RegisterResponse, AuthError> {
        let url = self.inner.endpoint(REGISTER_PATH);

        debug!(
            "Registering {} as {:?}",
            registration.email,
            registration.profile.role()
        );
        let response = self
            .inner
            .http_client
            .post(&url)
            .json(registration)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::api(status.as_u16(), &error_text));
        }

        Ok(response.json::<RegisterResponse>().await?)
    }

    /// Load a persisted session at startup.
    ///
    /// Refreshes the access token if it is stale and re-derives the user
    /// (profile endpoint, else claims). Returns `None` when there is no
    /// session or it could not be refreshed.
    pub async fn restore(&self) -> Result<Option<Session>, AuthError> {
        let tokens = match self.inner.current_tokens().await? {
            Some(tokens) => tokens,
            None => return Ok(None),
        };

        let access = match self.get_valid_access_token().await {
            Ok(access) => access,
            Err(e) if e.is_session_error() => {
                info!("Stored session could not be restored: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let user = self.inner.resolve_user(&access).await;
        self.inner.store_user_for(&tokens.refresh, user);
        Ok(self.session())
    }

    /// Clear storage, memory and refresh state. Safe to call when already
    /// logged out.
    pub async fn logout(&self) {
        self.inner.clear().await;
        info!("Logged out");
    }

    /// Return an access token that is not known to be expired, refreshing it
    /// first when needed.
    ///
    /// Fails with `Unauthenticated` when there is no session and with
    /// `SessionExpired` when the refresh fails.
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        let tokens = self
            .inner
            .current_tokens()
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if !needs_refresh(&tokens.access, self.inner.leeway()) {
            return Ok(tokens.access);
        }

        debug!("Access token {} is stale", preview(&tokens.access));
        self.inner.refresh_shared(tokens.access).await
    }

    /// Handle a 401 reported by the HTTP layer and return the token to replay
    /// the request with.
    ///
    /// A 401 from the refresh endpoint itself ends the session.
    pub async fn on_unauthorized_response(
        &self,
        failed: &FailedRequest,
    ) -> Result<String, AuthError> {
        if self.is_refresh_url(&failed.url) {
            warn!("Refresh endpoint rejected the refresh token, ending session");
            self.logout().await;
            return Err(AuthError::SessionExpired);
        }

        if failed.retried {
            return Err(AuthError::ApiError {
                status: 401,
                message: "request was already retried after a token refresh".into(),
            });
        }

        let tokens = self
            .inner
            .current_tokens()
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let stale = failed.access_token.clone().unwrap_or(tokens.access);
        debug!("401 for {} with token {}", failed.url, preview(&stale));
        self.inner.refresh_shared(stale).await
    }

    /// Fetch `/users/me/` and replace the in-memory profile
    pub async fn fetch_user(&self) -> Result<UserProfile, AuthError> {
        let access = self.get_valid_access_token().await?;
        let user = self.inner.request_profile(&access).await?;
        self.set_user(user.clone());
        Ok(user)
    }

    /// Replace the in-memory profile, e.g. after the user edits it.
    /// No effect when logged out.
    pub fn set_user(&self, user: UserProfile) {
        let mut session = self.inner.write_session();
        if let Some(session) = session.as_mut() {
            session.user = Some(user);
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.read_session()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.read_session().and_then(|session| session.user)
    }

    /// Whether a session is loaded in memory
    pub fn is_authenticated(&self) -> bool {
        self.inner.read_session().is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_refreshing()
    }

    /// Whether `url` points at the refresh endpoint
    pub fn is_refresh_url(&self, url: &str) -> bool {
        let refresh = self.inner.endpoint(REFRESH_PATH);
        match (Url::parse(url), Url::parse(&refresh)) {
            (Ok(a), Ok(b)) => {
                a.host_str() == b.host_str()
                    && a.port_or_known_default() == b.port_or_known_default()
                    && a.path() == b.path()
            }
            _ => url == refresh,
        }
    }
}

impl Inner {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    fn leeway(&self) -> i64 {
        i64::try_from(self.options.expiry_leeway.as_secs()).unwrap_or(i64::MAX)
    }

    fn read_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tokens from memory, falling back to storage on first use
    async fn current_tokens(&self) -> Result<Option<AuthTokens>, AuthError> {
        if let Some(session) = self.read_session() {
            return Ok(Some(session.tokens));
        }
        if !self.options.persist_session {
            return Ok(None);
        }

        let epoch = self.coordinator.epoch();
        let loaded = match self.load_tokens().await {
            Some(tokens) => tokens,
            None => return Ok(None),
        };

        let _guard = self.write_lock.lock().await;
        if self.coordinator.epoch() != epoch {
            // Logged in or out while reading storage
            return Ok(self.read_session().map(|session| session.tokens));
        }

        let mut session = self.write_session();
        let session = session.get_or_insert_with(|| Session {
            tokens: loaded,
            user: None,
        });
        Ok(Some(session.tokens.clone()))
    }

    /// Stored tokens, if readable. An unreadable store counts as logged out.
    async fn load_tokens(&self) -> Option<AuthTokens> {
        let raw = match self.storage.get_item(&self.options.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read stored session, treating as logged out: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<AuthTokens>(&raw) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!("Discarding unreadable stored session: {}", e);
                self.remove_persisted().await;
                None
            }
        }
    }

    /// Write both tokens in one storage write
    async fn persist_tokens(&self, tokens: &AuthTokens) -> Result<(), AuthError> {
        if !self.options.persist_session {
            return Ok(());
        }
        let raw = serde_json::to_string(tokens)?;
        self.storage.set_item(&self.options.storage_key, &raw).await
    }

    async fn remove_persisted(&self) {
        if let Err(e) = self.storage.remove_item(&self.options.storage_key).await {
            warn!("Failed to remove stored session: {}", e);
        }
    }

    /// Replace the session with a new credential pair. Any refresh in
    /// flight for the previous session is discarded.
    async fn install(&self, tokens: &AuthTokens) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;
        self.coordinator.reset();
        self.persist_tokens(tokens).await?;
        *self.write_session() = Some(Session {
            tokens: tokens.clone(),
            user: None,
        });
        Ok(())
    }

    async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        self.coordinator.reset();
        *self.write_session() = None;
        self.remove_persisted().await;
    }

    /// Set the user if the session for `refresh` is still the current one
    fn store_user_for(&self, refresh: &str, user: Option<UserProfile>) {
        let mut session = self.write_session();
        if let Some(session) = session.as_mut() {
            if session.tokens.refresh == refresh {
                session.user = user;
            }
        }
    }

    /// Profile from the API, else from the token claims
    async fn resolve_user(&self, access: &str) -> Option<UserProfile> {
        match self.request_profile(access).await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("{}; falling back to token claims", e);
                match AccessClaims::decode(access) {
                    Ok(claims) => Some(claims.to_profile()),
                    Err(e) => {
                        warn!("Access token claims unavailable: {}", e);
                        None
                    }
                }
            }
        }
    }

    async fn request_profile(&self, access: &str) -> Result<UserProfile, AuthError> {
        let url = self.endpoint(PROFILE_PATH);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access)
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::ProfileFetchFailed(format!(
                "status {}: {}",
                status.as_u16(),
                error_message(&error_text)
            )));
        }

        response
            .json::<UserProfile>()
            .await
            .map_err(|e| AuthError::ProfileFetchFailed(e.to_string()))
    }

    /// Join the coordinator and wait for the shared outcome. `stale` is the
    /// access token the caller found to be unusable.
    async fn refresh_shared(self: &Arc<Self>, stale: String) -> Result<String, AuthError> {
        let rx = match self.coordinator.join() {
            Join::Leader { epoch, rx } => {
                tokio::spawn(Arc::clone(self).run_refresh(epoch, stale));
                rx
            }
            Join::Follower(rx) => rx,
        };

        match rx.await {
            Ok(RefreshOutcome::Refreshed(token)) => Ok(token),
            Ok(RefreshOutcome::Failed) | Err(_) => Err(AuthError::SessionExpired),
        }
    }

    /// Body of one refresh cycle. Runs detached from the caller that
    /// started it, so cancelling that caller cannot strand the waiters.
    async fn run_refresh(self: Arc<Self>, epoch: u64, stale: String) {
        let current = match self.read_session() {
            Some(session) => session,
            None => {
                self.fail_refresh(epoch).await;
                return;
            }
        };

        // Someone else already replaced the stale token
        if current.tokens.access != stale
            && !needs_refresh(&current.tokens.access, self.leeway())
        {
            self.coordinator
                .complete(epoch, RefreshOutcome::Refreshed(current.tokens.access));
            return;
        }

        let result = match self.options.refresh_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.request_refresh(&current.tokens.refresh))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AuthError::RefreshTimeout(limit)),
                }
            }
            None => self.request_refresh(&current.tokens.refresh).await,
        };

        let access = match result {
            Ok(access) => access,
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.fail_refresh(epoch).await;
                return;
            }
        };

        // The refresh token is reused, not rotated
        let tokens = AuthTokens::new(access, current.tokens.refresh);
        if let Err(e) = self.commit_refresh(epoch, &tokens).await {
            warn!("Failed to store refreshed token: {}", e);
            self.fail_refresh(epoch).await;
        }
    }

    async fn commit_refresh(&self, epoch: u64, tokens: &AuthTokens) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;
        if self.coordinator.epoch() != epoch {
            debug!("Session changed during refresh, dropping refreshed token");
            return Ok(());
        }

        self.persist_tokens(tokens).await?;
        {
            let mut session = self.write_session();
            let user = session.take().and_then(|session| session.user);
            *session = Some(Session {
                tokens: tokens.clone(),
                user,
            });
        }

        info!("Access token refreshed: {}", preview(&tokens.access));
        self.coordinator
            .complete(epoch, RefreshOutcome::Refreshed(tokens.access.clone()));
        Ok(())
    }

    /// End the session, then reject every waiter of the cycle
    async fn fail_refresh(&self, epoch: u64) {
        let waiters = {
            let _guard = self.write_lock.lock().await;
            let waiters = match self.coordinator.abort(epoch) {
                Some(waiters) => waiters,
                None => return,
            };
            *self.write_session() = None;
            self.remove_persisted().await;
            waiters
        };

        info!("Session cleared after failed refresh");
        RefreshCoordinator::notify(waiters, RefreshOutcome::Failed);
    }

    async fn request_refresh(&self, refresh: &str) -> Result<String, AuthError> {
        let url = self.endpoint(REFRESH_PATH);
        let payload = serde_json::json!({ "refresh": refresh });

        let response = self.http_client.post(&url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::api(status.as_u16(), &error_text));
        }

        let body: RefreshResponse = response.json().await?;
        if body.access.is_empty() {
            return Err(AuthError::InvalidResponse(
                "refresh response has an empty access token".into(),
            ));
        }
        Ok(body.access)
    }
}
