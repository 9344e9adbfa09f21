//! HTTP client wrapper for authenticated requests to the VENTU API
//!
//! Every request asks the session manager for a valid access token before it
//! is sent. A 401 on the first attempt of an authenticated request hands the
//! failure to the session manager and replays the request once with the
//! refreshed token.

use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;
use ventu_rust_auth::{AuthError, FailedRequest, SessionManager};

use crate::error::Error;

/// Client for the VENTU API that attaches and refreshes credentials
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http_client: Client,
    auth: SessionManager,
    request_timeout: Option<Duration>,
}

impl ApiClient {
    /// Create a new ApiClient
    pub fn new(
        base_url: &str,
        http_client: Client,
        auth: SessionManager,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            auth,
            request_timeout,
        }
    }

    pub fn auth(&self) -> &SessionManager {
        &self.auth
    }

    /// Start a request to `path`, relative to the API base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path)
    }

    /// Create a GET request
    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    /// Create a POST request
    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    /// Create a PUT request
    pub fn put(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    /// Create a PATCH request
    pub fn patch(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    /// Create a DELETE request
    pub fn delete(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    /// Pre-request hook: the token to attach, if any.
    ///
    /// No session means the request goes out anonymously. A session that
    /// could not be refreshed is an error.
    async fn before_send(&self) -> Result<Option<String>, Error> {
        match self.auth.get_valid_access_token().await {
            Ok(token) => Ok(Some(token)),
            Err(AuthError::Unauthenticated) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Post-response hook: the token to replay with, or `None` when the
    /// response should be handed back as it is.
    async fn after_response(
        &self,
        response: &Response,
        url: &Url,
        sent_token: Option<String>,
        retried: bool,
    ) -> Result<Option<String>, Error> {
        if response.status() != StatusCode::UNAUTHORIZED || retried {
            return Ok(None);
        }
        // Anonymous requests have nothing to refresh
        let Some(sent_token) = sent_token else {
            return Ok(None);
        };

        let failed = FailedRequest::new(url.as_str())
            .with_access_token(sent_token)
            .with_retried(retried);
        let token = self.auth.on_unauthorized_response(&failed).await?;
        Ok(Some(token))
    }
}

/// Helper for building and executing one API request
pub struct RequestBuilder<'a> {
    client: &'a ApiClient,
    method: Method,
    path: String,
    headers: HeaderMap,
    query_params: Option<HashMap<String, String>>,
    body: Option<Vec<u8>>,
    authenticated: bool,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a ApiClient, method: Method, path: &str) -> Self {
        Self {
            client,
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            query_params: None,
            body: None,
            authenticated: true,
        }
    }

    /// Add a header to the request
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add query parameters to the request
    pub fn query(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = Some(params);
        self
    }

    /// Add a JSON body to the request
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(body)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(json);
        Ok(self)
    }

    /// Send without credentials even when logged in
    pub fn without_auth(mut self) -> Self {
        self.authenticated = false;
        self
    }

    fn url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&format!("{}{}", self.client.base_url, self.path))?;

        // Add query parameters if present
        if let Some(params) = &self.query_params {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in params {
                query_pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Build one attempt of the request
    fn build(&self, url: &Url, token: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .http_client
            .request(self.method.clone(), url.as_str())
            .headers(self.headers.clone());

        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(timeout) = self.client.request_timeout {
            req = req.timeout(timeout);
        }
        if let Some(body) = &self.body {
            req = req.body(body.clone());
        }

        req
    }

    /// Send the request and return the raw response.
    ///
    /// Non-success statuses are not errors here, except that a 401 on the
    /// first authenticated attempt triggers one refresh and replay.
    pub async fn send(&self) -> Result<Response, Error> {
        let url = self.url()?;
        let mut token = if self.authenticated {
            self.client.before_send().await?
        } else {
            None
        };
        let mut retried = false;

        loop {
            let response = self.build(&url, token.as_deref()).send().await?;

            match self
                .client
                .after_response(&response, &url, token.take(), retried)
                .await?
            {
                Some(fresh) => {
                    debug!("Replaying {} {} with refreshed token", self.method, url.path());
                    token = Some(fresh);
                    retried = true;
                }
                None => return Ok(response),
            }
        }
    }

    /// Send the request and parse the response as JSON
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let response = self.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(Error::api(status.as_u16(), &text));
        }

        let result = response.json::<T>().await?;
        Ok(result)
    }

    /// Send the request and only check the status, for empty responses
    pub async fn execute_empty(&self) -> Result<(), Error> {
        let response = self.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(Error::api(status.as_u16(), &text));
        }

        Ok(())
    }
}
