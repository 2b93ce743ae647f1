//! Google OAuth2 credential lifecycle
//!
//! Implements the authorization code flow for installed apps. The consent
//! step is delegated to a [`RedirectHandler`] (by default a loopback listener,
//! see [`super::LoopbackRedirect`]) and token requests go through a
//! [`TokenEndpoint`], so the lifecycle can be exercised without a browser.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::LoopbackRedirect;
use crate::config::OAuthClientConfig;
use crate::error::AuthError;

/// An OAuth access token with what is needed to keep it valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes requested when consent was given
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    /// Tokens expiring within this many seconds are treated as expired
    const EXPIRY_MARGIN_SECS: i64 = 300;

    /// Whether the access token must be renewed before use at `now`
    ///
    /// A token with no known expiry is treated as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + TimeDelta::seconds(Self::EXPIRY_MARGIN_SECS),
            None => true,
        }
    }

    /// Whether consent was given for every scope in `scopes`
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }

    fn from_response(
        response: TokenResponse,
        scopes: Vec<String>,
        previous_refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            // Refresh responses usually omit the refresh token
            refresh_token: response.refresh_token.or(previous_refresh_token),
            expires_at: response
                .expires_in
                .map(|secs| now + TimeDelta::seconds(secs as i64)),
            scopes,
        }
    }
}

/// Token response from Google
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// Authorization code returned by the consent redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    /// The redirect URI the code was issued for; must be echoed on exchange
    pub redirect_uri: String,
}

/// What the user is asked to consent to
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl ConsentRequest {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";

    /// Build the consent URL for a given redirect URI
    pub fn authorization_url(&self, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
        )
    }
}

/// Runs the interactive part of the consent flow
pub trait RedirectHandler: Send + Sync {
    /// Obtain an authorization code for `request`
    fn authorize(&self, request: &ConsentRequest) -> Result<AuthorizationCode, AuthError>;
}

/// The OAuth token endpoint
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for tokens
    fn exchange_code(&self, code: &AuthorizationCode) -> Result<TokenResponse, AuthError>;

    /// Get a new access token from a refresh token
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

/// Google's token endpoint over ureq
pub struct GoogleOAuth {
    client_id: String,
    client_secret: String,
    agent: ureq::Agent,
}

impl GoogleOAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(config: &OAuthClientConfig, timeout: Duration) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            agent: ureq::Agent::new_with_config(agent_config),
        }
    }

    fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let mut response = self
            .agent
            .post(Self::TOKEN_URL)
            .send_form(form.iter().copied())
            .map_err(|e| {
                AuthError::TokenRequest(format!("Failed to reach token endpoint: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(AuthError::TokenRequest(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::TokenRequest(format!("Failed to parse token response: {}", e)))
    }
}

impl TokenEndpoint for GoogleOAuth {
    fn exchange_code(&self, code: &AuthorizationCode) -> Result<TokenResponse, AuthError> {
        debug!("Exchanging authorization code for tokens");
        self.post_form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code.code.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", code.redirect_uri.as_str()),
        ])
    }

    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        debug!("Refreshing access token");
        self.post_form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
    }
}

/// Single-file durable token store
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub const FILE_NAME: &'static str = "token.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The token file in the user config directory
    pub fn default_location() -> Result<Self, AuthError> {
        config::config_path(Self::FILE_NAME)
            .map(Self::new)
            .ok_or_else(|| AuthError::Store("Could not determine config directory".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential
    ///
    /// A missing or unreadable file yields `None`, which leads to a fresh
    /// consent rather than a failed run.
    pub fn load(&self) -> Result<Option<Credential>, AuthError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::Store(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        match serde_json::from_str(&content) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Ignoring unreadable token file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    /// Replace the stored credential
    pub fn persist(&self, credential: &Credential) -> Result<(), AuthError> {
        config::save_json_file(&self.path, credential)
            .map_err(|e| AuthError::Store(format!("{:#}", e)))?;
        restrict_permissions(&self.path);
        Ok(())
    }

    /// Remove the stored credential (logout)
    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Store(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("Failed to restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Owns acquisition, refresh and persistence of the OAuth credential
pub struct CredentialManager {
    client_id: String,
    endpoint: Arc<dyn TokenEndpoint>,
    redirect: Arc<dyn RedirectHandler>,
    store: TokenStore,
}

impl CredentialManager {
    pub fn new(
        client_id: impl Into<String>,
        endpoint: Arc<dyn TokenEndpoint>,
        redirect: Arc<dyn RedirectHandler>,
        store: TokenStore,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint,
            redirect,
            store,
        }
    }

    /// Wire up Google's token endpoint, the loopback redirect and the default token store
    pub fn google(config: &OAuthClientConfig, timeout: Duration) -> Result<Self, AuthError> {
        Ok(Self::new(
            config.client_id.clone(),
            Arc::new(GoogleOAuth::new(config, timeout)),
            Arc::new(LoopbackRedirect::default()),
            TokenStore::default_location()?,
        ))
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn load(&self) -> Result<Option<Credential>, AuthError> {
        self.store.load()
    }

    pub fn persist(&self, credential: &Credential) -> Result<(), AuthError> {
        self.store.persist(credential)
    }

    /// Run the interactive consent flow and exchange the code for tokens
    pub fn acquire(&self, scopes: &[String]) -> Result<Credential, AuthError> {
        info!("Requesting consent for {} scope(s)", scopes.len());
        let request = ConsentRequest {
            client_id: self.client_id.clone(),
            scopes: scopes.to_vec(),
        };

        let code = self.redirect.authorize(&request)?;
        let response = self.endpoint.exchange_code(&code)?;
        let credential = Credential::from_response(response, scopes.to_vec(), None, Utc::now());

        self.persist_or_warn(&credential);
        info!("Authorization complete");
        Ok(credential)
    }

    /// Return a credential usable for `scopes`, refreshing or re-consenting as needed
    ///
    /// Makes at most one refresh call. A failed refresh falls back to consent.
    pub fn ensure_valid(
        &self,
        current: Option<Credential>,
        scopes: &[String],
    ) -> Result<Credential, AuthError> {
        let Some(credential) = current else {
            info!("No stored credential");
            return self.acquire(scopes);
        };

        if !credential.covers(scopes) {
            info!("Stored credential lacks required scopes, requesting consent again");
            return self.acquire(scopes);
        }

        if !credential.is_expired_at(Utc::now()) {
            return Ok(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            info!("Access token expired and no refresh token stored");
            return self.acquire(scopes);
        };

        match self.refresh(&credential, &refresh_token) {
            Ok(refreshed) => Ok(refreshed),
            Err(e) => {
                warn!("Token refresh failed, falling back to consent: {}", e);
                self.acquire(scopes)
            }
        }
    }

    /// Remove the stored credential
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.clear()
    }

    fn refresh(
        &self,
        credential: &Credential,
        refresh_token: &str,
    ) -> Result<Credential, AuthError> {
        let response = self.endpoint.refresh(refresh_token)?;
        let refreshed = Credential::from_response(
            response,
            credential.scopes.clone(),
            Some(refresh_token.to_string()),
            Utc::now(),
        );

        self.persist_or_warn(&refreshed);
        info!("Access token refreshed");
        Ok(refreshed)
    }

    // A token that works but cannot be saved still serves this run
    fn persist_or_warn(&self, credential: &Credential) {
        if let Err(e) = self.persist(credential) {
            warn!("Failed to save credential: {}", e);
        }
    }
}
