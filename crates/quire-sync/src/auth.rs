//! OAuth 2 authorization-code flow with PKCE, token refresh and persistence.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use quire_core::AuthSection;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use url::Url;

use crate::error::AuthError;

/// Anything that can hand out a bearer token for remote calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token believed to be valid, refreshing first if needed.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Mark the current token as rejected so the next call refreshes.
    async fn invalidate(&self);
}

/// Stored OAuth tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// `None` for tokens that never expire.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Whether the access token expires within `skew` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| at - skew <= now)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}…")
}

/// An authorization request waiting for its redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingAuth {
    verifier: String,
    state: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthState {
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    pending: Option<PendingAuth>,
    /// Set after the remote rejected the current access token.
    #[serde(skip)]
    rejected: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Owns the user's credentials for the remote store.
///
/// All state sits behind one async mutex, which is held across token
/// exchanges: two concurrent `complete_auth` calls for the same redirect run
/// the exchange once, and concurrent `access_token` calls refresh once.
pub struct AuthManager {
    http: reqwest::Client,
    config: AuthSection,
    path: Option<PathBuf>,
    skew: chrono::Duration,
    state: Mutex<AuthState>,
}

impl AuthManager {
    /// In-memory manager with no stored credentials.
    pub fn new(config: AuthSection) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            path: None,
            skew: chrono::Duration::seconds(60),
            state: Mutex::new(AuthState::default()),
        }
    }

    /// Manager persisting to `path`, loading whatever is stored there.
    pub fn load(config: AuthSection, path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => {
                serde_json::from_str(&text).map_err(|source| AuthError::Serialization {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AuthState::default(),
            Err(e) => return Err(AuthError::io(&path, e)),
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
            ..Self::new(config)
        })
    }

    /// Use a specific HTTP client.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Treat tokens this close to expiry as stale.
    pub fn with_token_skew(mut self, skew: Duration) -> Self {
        self.skew = chrono::Duration::from_std(skew).unwrap_or(self.skew);
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.credentials.is_some()
    }

    /// Current credentials, if connected.
    pub async fn credentials(&self) -> Option<Credentials> {
        self.state.lock().await.credentials.clone()
    }

    /// Store credentials obtained out of band (for example a token generated
    /// in the provider's app console).
    pub async fn set_credentials(&self, credentials: Credentials) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        state.credentials = Some(credentials);
        state.rejected = false;
        self.persist(&state)
    }

    /// Start an authorization request and return the URL the user must open.
    pub async fn begin_auth(&self) -> Result<Url, AuthError> {
        let verifier = random_urlsafe(32);
        let challenge = code_challenge(&verifier);
        let csrf = random_urlsafe(16);

        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("token_access_type", "offline"),
                ("state", csrf.as_str()),
            ],
        )
        .map_err(|source| AuthError::InvalidUrl {
            url: self.config.authorize_url.clone(),
            source,
        })?;

        let mut state = self.state.lock().await;
        state.pending = Some(PendingAuth {
            verifier,
            state: csrf,
        });
        self.persist(&state)?;

        tracing::debug!("started authorization request");
        Ok(url)
    }

    /// Finish an authorization request from the redirect URL.
    ///
    /// Returns `Ok(true)` when a code was exchanged and `Ok(false)` when there
    /// was nothing to do because the pending request was already consumed.
    pub async fn complete_auth(&self, redirect_url: &str) -> Result<bool, AuthError> {
        let url = Url::parse(redirect_url).map_err(|source| AuthError::InvalidUrl {
            url: redirect_url.to_string(),
            source,
        })?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let mut state = self.state.lock().await;

        if let Some(error) = params.get("error") {
            state.pending = None;
            self.persist(&state)?;
            let reason = params
                .get("error_description")
                .cloned()
                .unwrap_or_else(|| error.clone());
            return Err(AuthError::Denied { reason });
        }

        let code = params.get("code").ok_or(AuthError::MissingCode)?;

        // Taking the verifier before the exchange makes a replay a no-op.
        let Some(pending) = state.pending.take() else {
            tracing::debug!("authorization already completed, ignoring redirect");
            return Ok(false);
        };
        if params.get("state") != Some(&pending.state) {
            state.pending = Some(pending);
            return Err(AuthError::StateMismatch);
        }

        self.persist(&state)?;
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", pending.verifier.as_str()),
            ])
            .await?;

        state.credentials = Some(credentials_from(response, None));
        state.rejected = false;
        self.persist(&state)?;

        tracing::info!("connected to remote store");
        Ok(true)
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Forget all credentials and any pending request.
    pub async fn disconnect(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        *state = AuthState::default();
        self.persist(&state)?;
        tracing::info!("disconnected from remote store");
        Ok(())
    }

    async fn refresh_locked(&self, state: &mut AuthState) -> Result<(), AuthError> {
        let refresh_token = state
            .credentials
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
            .ok_or(AuthError::NotConnected)?;

        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ])
            .await?;

        state.credentials = Some(credentials_from(response, Some(refresh_token)));
        state.rejected = false;
        self.persist(state)?;

        tracing::debug!("refreshed access token");
        Ok(())
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self.http.post(&self.config.token_url).form(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "token endpoint refused request");
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<TokenResponse>().await?)
    }

    fn persist(&self, state: &AuthState) -> Result<(), AuthError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, state)
    }
}

#[async_trait]
impl TokenSource for AuthManager {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        let credentials = state.credentials.as_ref().ok_or(AuthError::NotConnected)?;

        if state.rejected || credentials.is_stale(Utc::now(), self.skew) {
            if credentials.refresh_token.is_none() {
                return Err(if state.rejected {
                    AuthError::Rejected
                } else {
                    AuthError::NotConnected
                });
            }
            self.refresh_locked(&mut state).await?;
        }

        state
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or(AuthError::NotConnected)
    }

    async fn invalidate(&self) {
        self.state.lock().await.rejected = true;
    }
}

fn credentials_from(response: TokenResponse, previous_refresh: Option<String>) -> Credentials {
    Credentials {
        access_token: response.access_token,
        refresh_token: response.refresh_token.or(previous_refresh),
        expires_at: response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
    }
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 PKCE challenge for `verifier`.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn write_atomic(path: &Path, state: &AuthState) -> Result<(), AuthError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| AuthError::io(dir, e))?;

    let json = serde_json::to_vec_pretty(state).map_err(|source| AuthError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| AuthError::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| AuthError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| AuthError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(server: &mockito::ServerGuard) -> AuthSection {
        AuthSection {
            client_id: "app-key".to_string(),
            authorize_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: format!("{}/oauth2/token", server.url()),
            redirect_uri: "http://localhost:53682/callback".to_string(),
        }
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn test_code_challenge_matches_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCQaoeY6M8bCqKNQM5vMzRhQ"
        );
    }

    #[test]
    fn test_stale_within_skew() {
        let now = Utc::now();
        let creds = Credentials {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(creds.is_stale(now, chrono::Duration::seconds(60)));
        assert!(!creds.is_stale(now, chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_debug_masks_tokens() {
        let creds = Credentials {
            access_token: "sl.secret-token".into(),
            refresh_token: Some("refresh-secret".into()),
            expires_at: None,
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret-token"));
        assert!(!shown.contains("refresh-secret"));
    }

    #[tokio::test]
    async fn test_begin_auth_builds_pkce_url() {
        let server = mockito::Server::new_async().await;
        let auth = AuthManager::new(section(&server));

        let url = auth.begin_auth().await.unwrap();
        let params = query(&url);

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "app-key");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["token_access_type"], "offline");
        assert!(!params["state"].is_empty());
        assert_eq!(params["code_challenge"].len(), 43);
    }

    #[tokio::test]
    async fn test_complete_auth_exchanges_once() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth2/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "authorization_code".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":14400}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = AuthManager::new(section(&server));
        let url = auth.begin_auth().await.unwrap();
        let state = query(&url)["state"].clone();
        let redirect = format!("http://localhost:53682/callback?code=abc&state={state}");

        assert!(auth.complete_auth(&redirect).await.unwrap());
        assert!(!auth.complete_auth(&redirect).await.unwrap());

        token.assert_async().await;
        assert_eq!(auth.access_token().await.unwrap(), "at-1");
    }

    #[tokio::test]
    async fn test_complete_auth_reports_denial() {
        let server = mockito::Server::new_async().await;
        let auth = AuthManager::new(section(&server));
        auth.begin_auth().await.unwrap();

        let err = auth
            .complete_auth("http://localhost:53682/callback?error=access_denied")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied { reason } if reason == "access_denied"));
        assert!(!auth.is_connected().await);
    }

    #[tokio::test]
    async fn test_complete_auth_rejects_wrong_state() {
        let server = mockito::Server::new_async().await;
        let auth = AuthManager::new(section(&server));
        auth.begin_auth().await.unwrap();

        let err = auth
            .complete_auth("http://localhost:53682/callback?code=abc&state=forged")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_stale_token_is_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/oauth2/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-2","expires_in":14400}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = AuthManager::new(section(&server));
        auth.set_credentials(Credentials {
            access_token: "at-1".into(),
            refresh_token: Some("rt-1".into()),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(30)),
        })
        .await
        .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "at-2");
        assert_eq!(auth.access_token().await.unwrap(), "at-2");
        refresh.assert_async().await;

        // The refresh token survives a response that does not rotate it.
        let creds = auth.credentials().await.unwrap();
        assert_eq!(creds.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":14400}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = AuthManager::new(section(&server));
        auth.set_credentials(Credentials {
            access_token: "at-1".into(),
            refresh_token: Some("rt-1".into()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(4)),
        })
        .await
        .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "at-1");
        auth.invalidate().await;
        assert_eq!(auth.access_token().await.unwrap(), "at-2");
        refresh.assert_async().await;
        assert_eq!(
            auth.credentials().await.unwrap().refresh_token.as_deref(),
            Some("rt-2")
        );
    }

    #[tokio::test]
    async fn test_credentials_persist_and_disconnect_clears() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");

        let auth = AuthManager::load(AuthSection::default(), &path).unwrap();
        assert!(!auth.is_connected().await);
        auth.set_credentials(Credentials {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: None,
        })
        .await
        .unwrap();

        let reloaded = AuthManager::load(AuthSection::default(), &path).unwrap();
        assert!(reloaded.is_connected().await);

        reloaded.disconnect().await.unwrap();
        let after = AuthManager::load(AuthSection::default(), &path).unwrap();
        assert!(!after.is_connected().await);
        assert!(matches!(
            after.access_token().await,
            Err(AuthError::NotConnected)
        ));
    }
}
