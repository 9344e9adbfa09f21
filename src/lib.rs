//! VENTU Rust Client Library
//!
//! A Rust client for the VENTU tour marketplace API. It keeps the user's
//! session, refreshes the access token when it goes stale and gives every
//! consumer an HTTP client that attaches credentials transparently.

pub mod config;
pub mod error;
pub mod fetch;

use reqwest::Client;
use std::sync::Arc;

use crate::config::ClientOptions;
use crate::fetch::ApiClient;

pub use ventu_rust_auth as auth;
use ventu_rust_auth::{SessionManager, TokenStorage};

/// The main entry point for the VENTU Rust client
pub struct Ventu {
    /// The base URL of the API, e.g. `https://api.ventu.example/api`
    pub url: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Session manager shared by every request
    pub auth: SessionManager,
    /// Client options
    pub options: ClientOptions,
}

impl Ventu {
    /// Create a new VENTU client with an in-memory session
    ///
    /// # Example
    ///
    /// ```
    /// use ventu_rust::Ventu;
    ///
    /// let ventu = Ventu::new("https://api.ventu.example/api");
    /// assert!(!ventu.auth().is_authenticated());
    /// ```
    pub fn new(api_url: &str) -> Self {
        Self::new_with_options(api_url, ClientOptions::default())
    }

    /// Create a new VENTU client with custom options
    pub fn new_with_options(api_url: &str, options: ClientOptions) -> Self {
        let http_client = Client::new();
        let auth = SessionManager::new(api_url, http_client.clone(), options.auth_options());
        Self::from_parts(api_url, http_client, auth, options)
    }

    /// Create a new VENTU client whose session lives in `storage`
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use ventu_rust::{auth::FileStorage, config::ClientOptions, Ventu};
    ///
    /// let storage = Arc::new(FileStorage::new("/tmp/ventu-session"));
    /// let ventu = Ventu::with_storage(
    ///     "https://api.ventu.example/api",
    ///     storage,
    ///     ClientOptions::default(),
    /// );
    /// # let _ = ventu;
    /// ```
    pub fn with_storage(
        api_url: &str,
        storage: Arc<dyn TokenStorage>,
        options: ClientOptions,
    ) -> Self {
        let http_client = Client::new();
        let auth = SessionManager::with_storage(
            api_url,
            http_client.clone(),
            storage,
            options.auth_options(),
        );
        Self::from_parts(api_url, http_client, auth, options)
    }

    fn from_parts(
        api_url: &str,
        http_client: Client,
        auth: SessionManager,
        options: ClientOptions,
    ) -> Self {
        Self {
            url: api_url.trim_end_matches('/').to_string(),
            http_client,
            auth,
            options,
        }
    }

    /// Get a reference to the session manager
    pub fn auth(&self) -> &SessionManager {
        &self.auth
    }

    /// Get an API client for authenticated requests
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn run() -> Result<(), ventu_rust::error::Error> {
    /// use ventu_rust::Ventu;
    ///
    /// let ventu = Ventu::new("https://api.ventu.example/api");
    /// let packages: serde_json::Value = ventu.api().get("/packages/").execute().await?;
    /// # let _ = packages;
    /// # Ok(())
    /// # }
    /// ```
    pub fn api(&self) -> ApiClient {
        ApiClient::new(
            &self.url,
            self.http_client.clone(),
            self.auth.clone(),
            self.options.request_timeout,
        )
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::error::Error;
    pub use crate::fetch::ApiClient;
    pub use crate::Ventu;
    pub use ventu_rust_auth::{AuthError, AuthTokens, Session, SessionManager, UserProfile};
}
