//! Taikun REST API client.
//!
//! Uses reqwest to call `/api/v{n}` endpoints with a bearer token supplied by
//! the session's [`AuthManager`]. All reconcilers share one client (and thus
//! one connection pool and one token pair).

use std::future::Future;
use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taikun_core::config::{ApiConfig, Credentials};
use taikun_core::{Error, Result};

use crate::auth::AuthManager;
use crate::pager::{Page, collect_pages};
use crate::types::ErrorBody;

/// Query parameters for a call, in platform spelling.
pub type Query<'a> = [(&'a str, String)];

/// Typed JSON client for the platform API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_root: String,
    auth: Arc<AuthManager>,
    cancel: CancellationToken,
}

impl ApiClient {
    /// Create a client and its auth manager from configuration.
    pub fn new(api: &ApiConfig, credentials: Credentials) -> Result<Self> {
        if api.base_url.is_empty() {
            return Err(Error::Config("base_url is empty".into()));
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(api.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let api_root = format!(
            "{}/api/v{}",
            api.base_url.trim_end_matches('/'),
            api.api_version
        );
        let auth = Arc::new(AuthManager::new(http.clone(), api_root.clone(), credentials));
        Ok(Self {
            http,
            api_root,
            auth,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the auth manager, e.g. with one seeded from saved tokens.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthManager) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    /// Tie every call made through this client to `cancel`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// `/api/v{n}` root, e.g. for building an [`AuthManager`] by hand.
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    /// Build the full URL for an endpoint path (which starts with `/`).
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }

    /// Race `fut` against the client's cancellation signal.
    pub async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    pub async fn get<R: DeserializeOwned>(&self, path: &str, query: &Query<'_>) -> Result<R> {
        let resp = self
            .send(self.http.get(self.api_url(path)).query(query), path)
            .await?;
        Self::decode(resp, path).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .send(self.http.post(self.api_url(path)).json(body), path)
            .await?;
        Self::decode(resp, path).await
    }

    /// POST whose response body is ignored.
    pub async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(self.http.post(self.api_url(path)).json(body), path)
            .await
            .map(drop)
    }

    pub async fn put<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .send(self.http.put(self.api_url(path)).json(body), path)
            .await?;
        Self::decode(resp, path).await
    }

    /// PUT whose response body is ignored.
    pub async fn put_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(self.http.put(self.api_url(path)).json(body), path)
            .await
            .map(drop)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.http.delete(self.api_url(path)), path)
            .await
            .map(drop)
    }

    /// DELETE carrying a JSON body, as bulk-delete endpoints expect.
    pub async fn delete_with_body<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.send(
            self.http
                .request(Method::DELETE, self.api_url(path))
                .json(body),
            path,
        )
        .await
        .map(drop)
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Fetch one window of a list endpoint starting at `offset`.
    pub async fn list_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Query<'_>,
        offset: usize,
    ) -> Result<Page<T>> {
        let mut q = query.to_vec();
        q.push(("Offset", offset.to_string()));
        self.get(path, &q).await
    }

    /// Fetch every row of a list endpoint.
    pub async fn list_all<T: DeserializeOwned>(&self, path: &str, query: &Query<'_>) -> Result<Vec<T>> {
        collect_pages(&self.cancel, |offset| self.list_page(path, query, offset)).await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response> {
        self.cancellable(async {
            let token = self.auth.access_token().await?;
            debug!(path, "Sending platform request");
            let resp = builder
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| network_error(e, path))?;
            Self::check_status(resp, path).await
        })
        .await
    }

    /// Map non-success responses onto the error taxonomy.
    async fn check_status(resp: Response, path: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown").to_string()
                } else {
                    body.clone()
                }
            });
        warn!(path, status = status.as_u16(), %message, "Platform returned error");
        Err(match status {
            StatusCode::UNAUTHORIZED => Error::Auth(format!("{path}: {message}")),
            StatusCode::NOT_FOUND => Error::not_found("endpoint", path),
            _ => Error::Transport {
                status: Some(status.as_u16()),
                message: format!("{path}: {message}"),
                source: None,
            },
        })
    }

    async fn decode<R: DeserializeOwned>(resp: Response, path: &str) -> Result<R> {
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|e| network_error(e, path))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Transport {
            status: Some(status),
            message: format!("{path}: unexpected response body: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

fn network_error(e: reqwest::Error, path: &str) -> Error {
    Error::Transport {
        status: e.status().map(|s| s.as_u16()),
        message: format!("{path}: {e}"),
        source: Some(Box::new(e)),
    }
}
