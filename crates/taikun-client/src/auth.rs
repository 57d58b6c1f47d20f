//! Session token lifecycle.
//!
//! The platform issues a JWT access token plus an opaque refresh token. The
//! access token's `exp` claim is decoded locally (no signature check, no
//! trust in the server clock) to decide whether to refresh before a call.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use taikun_core::config::{AuthBackend, Credentials};
use taikun_core::{Error, Result};

const LOGIN_PATH: &str = "/auth/login";
const FEDERATED_LOGIN_PATH: &str = "/keycloak/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Access token plus the refresh token that proves the session is valid.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair { .. }")
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    token: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

/// Whether `token` must be rotated at unix time `now`.
///
/// Malformed tokens (wrong segment count, bad base64, bad JSON, missing or
/// non-integer `exp`) are treated as expired.
pub fn token_expired(token: &str, now: i64) -> bool {
    decode_exp(token).is_none_or(|exp| exp <= now)
}

fn decode_exp(token: &str) -> Option<i64> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.exp)
}

pub(crate) fn unix_now() -> i64 {
    #[allow(clippy::cast_possible_wrap)]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    secs
}

/// Holds the session's token pair and rotates it on demand.
///
/// One mutex serialises login, refresh and plain reads so a request never
/// picks up a token that is mid-rotation.
pub struct AuthManager {
    http: reqwest::Client,
    /// `{base_url}/api/v{n}`
    api_root: String,
    credentials: Credentials,
    state: Mutex<Option<TokenPair>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("api_root", &self.api_root)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn new(http: reqwest::Client, api_root: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http,
            api_root: api_root.into(),
            credentials,
            state: Mutex::new(None),
        }
    }

    /// Seed the session with an existing token pair instead of logging in.
    pub fn with_tokens(self, pair: TokenPair) -> Self {
        Self {
            state: Mutex::new(Some(pair)),
            ..self
        }
    }

    /// Current token pair, if any.
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.state.lock().await.clone()
    }

    /// Return a usable access token, logging in or refreshing first when needed.
    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let next = match state.as_ref() {
            None => self.login().await?,
            // A failed refresh keeps the old pair; never fall back to login.
            Some(pair) if token_expired(&pair.token, unix_now()) => self.refresh(pair).await?,
            Some(pair) => return Ok(pair.token.clone()),
        };
        let token = next.token.clone();
        *state = Some(next);
        Ok(token)
    }

    async fn login(&self) -> Result<TokenPair> {
        let path = match self.credentials.backend {
            AuthBackend::Default => LOGIN_PATH,
            AuthBackend::Federated => FEDERATED_LOGIN_PATH,
        };
        info!(email = %self.credentials.email, backend = ?self.credentials.backend, "Logging in");
        let body = LoginRequest {
            email: &self.credentials.email,
            password: &self.credentials.password,
        };
        self.exchange(path, &body).await.map_err(|e| {
            warn!(error = %e, "Login failed");
            Error::Auth(format!("login failed: {e}"))
        })
    }

    async fn refresh(&self, pair: &TokenPair) -> Result<TokenPair> {
        debug!("Access token expired, refreshing");
        let body = RefreshRequest {
            token: &pair.token,
            refresh_token: &pair.refresh_token,
        };
        self.exchange(REFRESH_PATH, &body).await.map_err(|e| {
            warn!(error = %e, "Token refresh failed");
            Error::Auth(format!("token refresh failed: {e}"))
        })
    }

    async fn exchange<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<TokenPair> {
        let url = format!("{}{path}", self.api_root);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::transport(None, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::transport(Some(status.as_u16()), text));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::transport(Some(status.as_u16()), e.to_string()))?;
        match (parsed.token, parsed.refresh_token) {
            (Some(token), Some(refresh_token)) if !token.is_empty() => Ok(TokenPair {
                token,
                refresh_token,
            }),
            _ => Err(Error::transport(
                Some(status.as_u16()),
                "response is missing token or refreshToken",
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &str) -> String {
        format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn exp_zero_is_expired() {
        let token = jwt_with_payload(r#"{"exp":0}"#);
        assert!(token_expired(&token, unix_now()));
    }

    #[test]
    fn far_future_exp_is_valid() {
        let token = jwt_with_payload(r#"{"exp":10000000000000}"#);
        assert!(!token_expired(&token, unix_now()));
    }

    #[test]
    fn exp_equal_to_now_is_expired() {
        let token = jwt_with_payload(r#"{"exp":1000}"#);
        assert!(token_expired(&token, 1000));
        assert!(!token_expired(&token, 999));
    }

    #[test]
    fn malformed_tokens_are_expired() {
        let now = 0;
        assert!(token_expired("", now));
        assert!(token_expired("only.two", now));
        assert!(token_expired("a.b.c.d", now));
        assert!(token_expired("h.!!!not-base64!!!.s", now));
        assert!(token_expired(&jwt_with_payload("not json"), now));
        assert!(token_expired(&jwt_with_payload(r#"{"sub":"x"}"#), now));
        assert!(token_expired(&jwt_with_payload(r#"{"exp":"soon"}"#), now));
    }

    #[test]
    fn padded_payload_is_tolerated() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":10000000000000}"#);
        let token = format!("h.{padded}.s");
        assert!(!token_expired(&token, unix_now()));
    }

    #[test]
    fn token_pair_debug_hides_secrets() {
        let pair = TokenPair {
            token: "secret-token".into(),
            refresh_token: "secret-refresh".into(),
        };
        assert!(!format!("{pair:?}").contains("secret"));
    }
}
