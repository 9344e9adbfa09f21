//! Configuration options for the VENTU client

use std::time::Duration;
use ventu_rust_auth::{AuthOptions, DEFAULT_STORAGE_KEY};

/// Configuration options for the VENTU client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whether to persist the credential pair in storage
    pub persist_session: bool,

    /// The storage key of the credential pair
    pub storage_key: String,

    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// The timeout of one token refresh call
    pub refresh_timeout: Option<Duration>,

    /// How long before `exp` a token counts as expired
    pub expiry_leeway: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            persist_session: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            refresh_timeout: Some(Duration::from_secs(10)),
            expiry_leeway: Duration::ZERO,
        }
    }
}

impl ClientOptions {
    /// Set whether to persist the session
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    /// Set the storage key
    pub fn with_storage_key(mut self, value: &str) -> Self {
        self.storage_key = value.to_string();
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the refresh timeout
    pub fn with_refresh_timeout(mut self, value: Option<Duration>) -> Self {
        self.refresh_timeout = value;
        self
    }

    /// Set the expiry leeway
    pub fn with_expiry_leeway(mut self, value: Duration) -> Self {
        self.expiry_leeway = value;
        self
    }

    /// The session manager's share of the options
    pub fn auth_options(&self) -> AuthOptions {
        AuthOptions::default()
            .with_persist_session(self.persist_session)
            .with_storage_key(&self.storage_key)
            .with_refresh_timeout(self.refresh_timeout)
            .with_expiry_leeway(self.expiry_leeway)
    }
}
