//! OAuth credential store for one identity.
//!
//! [`CredentialStore`] wraps the identity provider's authorize / token /
//! validate endpoints and the per-identity token file, and runs the
//! lifecycle described in the [module docs](super).
//!
//! Classification rules are deliberately literal:
//! - `validate` classifies failures by the provider's `message` string
//!   (exact match), never by HTTP status.
//! - `refresh` classifies solely by HTTP status: 400 is
//!   `invalid_refresh_token`, any other failure is `unknown`.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::storage::{TokenFile, TokenUpdate, Written};
use super::{redact, AuthError, Identity, TokenPair};
use crate::config::Config;

/// Alphabet for `state` and `nonce` values.
const RANDOM_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Provider message meaning the access token is no longer valid.
const INVALID_ACCESS_TOKEN_MESSAGE: &str = "invalid access token";

/// Provider message meaning no token was presented.
const MISSING_AUTHORIZATION_TOKEN_MESSAGE: &str = "missing authorization token";

/// Identity-provider settings shared by both identities.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://id.twitch.tv/oauth2`.
    pub base_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Redirect URI registered for the client.
    pub redirect_uri: String,
    /// Print the authorization URL instead of opening a browser.
    pub headless: bool,
}

impl ProviderConfig {
    /// Extract provider settings from a configuration snapshot.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.identity_provider_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            headless: config.headless_authorization,
        }
    }
}

/// Body of a successful `validate` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Client the token was issued to.
    #[serde(default)]
    pub client_id: String,
    /// Login name of the token owner.
    #[serde(default)]
    pub login: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// User id of the token owner.
    #[serde(default)]
    pub user_id: String,
    /// Seconds until the token expires.
    #[serde(default)]
    pub expires_in: u64,
}

/// Successful validation with its log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Decoded response body.
    pub data: ValidateResponse,
    /// Human-readable summary.
    pub message: String,
}

/// Token endpoint response (exchange and refresh).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Where the lifecycle ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// Tokens are valid; `authenticated` was emitted.
    Authenticated(TokenPair),
    /// An authorization URL was issued; waiting for the redirect.
    AwaitingAuthorization {
        /// The URL handed to the user.
        url: String,
    },
    /// The identity stays unauthenticated (unclassified or local failure).
    Unauthenticated {
        /// Why.
        reason: AuthError,
    },
}

/// An issued authorization URL and its `state`.
#[derive(Debug, Clone)]
struct PendingAuthorization {
    state: String,
    url: String,
}

/// Credential store and lifecycle for one identity.
#[derive(Debug)]
pub struct CredentialStore {
    identity: Identity,
    provider: ProviderConfig,
    http: reqwest::Client,
    file: TokenFile,
    tokens: Mutex<TokenPair>,
    /// Authorization URL handed out and not yet completed.
    pending: Mutex<Option<PendingAuthorization>>,
    /// Serializes lifecycle runs for this identity.
    flight: tokio::sync::Mutex<()>,
    authenticated: watch::Sender<Option<TokenPair>>,
}

impl CredentialStore {
    /// Create a store for `identity` persisting to `file`.
    #[must_use]
    pub fn new(identity: Identity, provider: ProviderConfig, file: TokenFile) -> Self {
        let (authenticated, _) = watch::channel(None);
        Self {
            identity,
            provider,
            http: reqwest::Client::new(),
            file,
            tokens: Mutex::new(TokenPair::default()),
            pending: Mutex::new(None),
            flight: tokio::sync::Mutex::new(()),
            authenticated,
        }
    }

    /// Create a store for one identity of a configuration snapshot.
    #[must_use]
    pub fn from_config(config: &Config, kind: super::IdentityKind) -> Self {
        Self::new(
            config.identity(kind),
            ProviderConfig::from_config(config),
            TokenFile::new(&config.data_dir, kind),
        )
    }

    /// The identity this store acts for.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Path of the persisted token file.
    #[must_use]
    pub fn filepath(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Current in-memory token pair.
    #[must_use]
    pub fn tokens(&self) -> TokenPair {
        self.tokens.lock().expect("tokens mutex poisoned").clone()
    }

    /// Watch the `authenticated` notifications.
    ///
    /// Holds `Some(pair)` after each successful authentication.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<TokenPair>> {
        self.authenticated.subscribe()
    }

    /// Wait until this identity is authenticated and return its tokens.
    pub async fn wait_authenticated(&self) -> TokenPair {
        let mut rx = self.authenticated.subscribe();
        let result = rx.wait_for(Option::is_some).await;
        match result {
            Ok(pair) => pair.clone().unwrap_or_default(),
            // Sender lives as long as `self`; unreachable while borrowed
            Err(_) => TokenPair::default(),
        }
    }

    /// Returns `true` once `authenticated` has been emitted.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.borrow().is_some()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Read persisted tokens into memory.
    ///
    /// A missing or corrupt file yields `None`; it is logged, never fatal.
    pub fn load(&self) -> Option<TokenPair> {
        let pair = self.file.read()?;
        *self.tokens.lock().expect("tokens mutex poisoned") = pair.clone();
        log::info!(
            "[oidc] Loaded {} tokens (access {})",
            self.identity.kind,
            pair.redacted()
        );
        Some(pair)
    }

    /// Merge `update` over the in-memory pair and persist the result.
    pub fn write(&self, update: &TokenUpdate) -> Result<Written> {
        let mut tokens = self.tokens.lock().expect("tokens mutex poisoned");
        let merged = update.merge(&tokens);
        self.file
            .write(&merged)
            .with_context(|| format!("Failed to persist {} tokens", self.identity.kind))?;
        *tokens = merged.clone();
        Ok(Written {
            tokens: merged,
            path: self.file.path().to_path_buf(),
        })
    }

    /// Persist `pair` and emit `authenticated` without a provider round-trip.
    ///
    /// Used when tokens arrive through an already-trusted channel.
    pub fn accept(&self, pair: &TokenPair) -> Result<Written> {
        let written = self.write(&TokenUpdate::from_pair(pair))?;
        self.emit_authenticated(written.tokens.clone());
        Ok(written)
    }

    fn emit_authenticated(&self, pair: TokenPair) {
        log::info!(
            "[oidc] {} ({}) authenticated",
            self.identity.kind,
            self.identity.display_name
        );
        self.authenticated.send_replace(Some(pair));
    }

    /// Withdraw a previous `authenticated` notification.
    fn emit_unauthenticated(&self) {
        let withdrawn = self.authenticated.send_if_modified(|current| current.take().is_some());
        if withdrawn {
            log::warn!("[oidc] {} is no longer authenticated", self.identity.kind);
        }
    }

    /// The authorization URL still waiting for its redirect, if any.
    #[must_use]
    pub fn pending_authorization(&self) -> Option<String> {
        self.pending
            .lock()
            .expect("state mutex poisoned")
            .as_ref()
            .map(|pending| pending.url.clone())
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// Opaque `state` value: `<9 random>-<userId>-<scope>`.
    #[must_use]
    pub fn state(user_id: &str, scope: &str) -> String {
        format!("{}-{}-{}", random_token(9), user_id, scope)
    }

    /// Random 16-character `nonce`.
    #[must_use]
    pub fn nonce() -> String {
        random_token(16)
    }

    /// Build a fresh authorization URL and remember its `state`.
    ///
    /// Replaces any outstanding URL; its redirect will no longer complete.
    pub fn authorization_url(&self) -> Result<String, AuthError> {
        let state = Self::state(&self.identity.id, &self.identity.scope);
        let nonce = Self::nonce();
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.provider.base_url),
            &[
                ("client_id", self.provider.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.provider.redirect_uri.as_str()),
                ("state", state.as_str()),
                ("nonce", nonce.as_str()),
                ("scope", self.identity.scope.as_str()),
            ],
        )
        .map_err(|e| AuthError::request(format!("Invalid authorize URL: {e}")))?
        .to_string();

        *self.pending.lock().expect("state mutex poisoned") = Some(PendingAuthorization {
            state,
            url: url.clone(),
        });
        Ok(url)
    }

    /// Issue an authorization URL and hand it to the user.
    ///
    /// Headless mode prints the link; otherwise a browser is opened (falling
    /// back to printing). Does not wait for the redirect.
    pub fn authorize(&self) -> Result<String, AuthError> {
        let url = self.authorization_url()?;

        if self.provider.headless {
            log::info!("[oidc] Authorize {} at {}", self.identity.kind, url);
            println!("Authorize the {} account: {}", self.identity.kind, url);
        } else if let Err(e) = open_browser(&url) {
            log::warn!("[oidc] Could not open browser: {e}");
            println!("Authorize the {} account: {}", self.identity.kind, url);
        }

        Ok(url)
    }

    /// Finish an authorization from the redirect's `state` and `code`.
    pub async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<TokenPair, AuthError> {
        let _flight = self.flight.lock().await;

        let expected = self
            .pending
            .lock()
            .expect("state mutex poisoned")
            .as_ref()
            .map(|pending| pending.state.clone());
        if expected.as_deref() != Some(state) {
            log::warn!("[oidc] Redirect state mismatch for {}", self.identity.kind);
            return Err(AuthError::StateMismatch);
        }

        let redirect_uri = self.provider.redirect_uri.clone();
        let pair = self.exchange(code, &redirect_uri).await?;
        let written = self
            .write(&TokenUpdate::from_pair(&pair))
            .map_err(|e| AuthError::request(format!("{e:#}")))?;

        *self.pending.lock().expect("state mutex poisoned") = None;
        self.emit_authenticated(written.tokens.clone());
        Ok(written.tokens)
    }

    // =========================================================================
    // Provider calls
    // =========================================================================

    /// Exchange an authorization code for a token pair.
    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<TokenPair, AuthError> {
        let response = self
            .http
            .post(format!("{}/token", self.provider.base_url))
            .form(&[
                ("client_id", self.provider.client_id.as_str()),
                ("client_secret", self.provider.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AuthError::request(format!("Exchange token error: {e}")))?;

        if response.status().is_success() {
            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::request(format!("Exchange token error: {e}")))?;
            return Ok(TokenPair {
                access_token: body.access_token,
                refresh_token: body.refresh_token.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::request(format!("Exchange token error: {e}")))?;
        Err(AuthError::Unknown(body))
    }

    /// Ask the provider whether `access_token` is still valid.
    pub async fn validate(&self, access_token: &str) -> Result<Validation, AuthError> {
        let response = self
            .http
            .get(format!("{}/validate", self.provider.base_url))
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await
            .map_err(|e| AuthError::request(format!("Validated token error: {e}")))?;

        let ok = response.status().is_success();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::request(format!("Validated token error: {e}")))?;

        if ok {
            let data: ValidateResponse = serde_json::from_value(body)
                .map_err(|e| AuthError::request(format!("Validated token error: {e}")))?;
            let scopes = serde_json::to_string(&data.scopes).unwrap_or_default();
            let message = format!("{} with {} scopes was successfully validated", data.login, scopes);
            return Ok(Validation { data, message });
        }

        Err(classify_validate_failure(body))
    }

    /// Renew the in-memory access token using its refresh token.
    ///
    /// Does not persist; callers write the returned pair.
    pub async fn refresh(&self) -> Result<TokenPair, AuthError> {
        let current = self.tokens();
        if current.refresh_token.is_empty() {
            return Err(AuthError::request("No refresh token available"));
        }

        let response = self
            .http
            .post(format!("{}/token", self.provider.base_url))
            .query(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
                ("client_id", self.provider.client_id.as_str()),
                ("client_secret", self.provider.client_secret.as_str()),
            ])
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await
            .map_err(|e| AuthError::request(format!("Refresh token error: {e}")))?;

        let status = response.status();
        if status.as_u16() == 400 {
            return Err(AuthError::InvalidRefreshToken);
        }

        if status.is_success() {
            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::request(format!("Refresh token error: {e}")))?;
            log::info!("[oidc] Access token refreshed successfully ({})", self.identity.kind);
            return Ok(TokenPair {
                access_token: body.access_token,
                refresh_token: body.refresh_token.unwrap_or(current.refresh_token),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::request(format!("Refresh token error: {e}")))?;
        Err(AuthError::Unknown(body))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the lifecycle, gated on the `listening` signal.
    ///
    /// Nothing is read or authorized until `listening` turns `true`.
    pub fn start_on_listening(
        self: &Arc<Self>,
        mut listening: watch::Receiver<bool>,
    ) -> JoinHandle<Lifecycle> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            if listening.wait_for(|ready| *ready).await.is_err() {
                return Lifecycle::Unauthenticated {
                    reason: AuthError::request("listening signal dropped"),
                };
            }
            store.run_lifecycle().await
        })
    }

    /// Load persisted tokens, then validate / refresh / authorize as needed.
    pub async fn run_lifecycle(&self) -> Lifecycle {
        let _flight = self.flight.lock().await;
        if self.load().is_none() {
            log::info!("[oidc] No stored tokens for {}", self.identity.kind);
        }
        self.renew().await
    }

    /// Re-check the in-memory tokens (validate → refresh → authorize).
    ///
    /// Called when a service rejects the current token. Unless the outcome is
    /// [`Lifecycle::Authenticated`], the earlier `authenticated` notification
    /// is withdrawn so callers can wait for the next one. An authorization
    /// URL that is already outstanding is reused, not reissued.
    pub async fn ensure_authenticated(&self) -> Lifecycle {
        let _flight = self.flight.lock().await;
        let outcome = self.renew().await;
        if !matches!(outcome, Lifecycle::Authenticated(_)) {
            self.emit_unauthenticated();
        }
        outcome
    }

    async fn renew(&self) -> Lifecycle {
        let tokens = self.tokens();
        if !tokens.is_authenticated() {
            return self.begin_authorization();
        }

        match self.validate(&tokens.access_token).await {
            Ok(validation) => {
                log::info!("[oidc] {}", validation.message);
                self.emit_authenticated(tokens.clone());
                Lifecycle::Authenticated(tokens)
            }
            Err(AuthError::InvalidAccessToken) => {
                log::info!(
                    "[oidc] Access token {} for {} rejected, refreshing",
                    tokens.redacted(),
                    self.identity.kind
                );
                self.renew_with_refresh().await
            }
            Err(AuthError::MissingAuthorizationToken) => self.begin_authorization(),
            Err(e) => {
                log::error!(
                    "[oidc] Could not classify validate failure for {}: {}",
                    self.identity.kind,
                    e
                );
                Lifecycle::Unauthenticated { reason: e }
            }
        }
    }

    async fn renew_with_refresh(&self) -> Lifecycle {
        match self.refresh().await {
            Ok(pair) => match self.write(&TokenUpdate::from_pair(&pair)) {
                Ok(written) => {
                    self.emit_authenticated(written.tokens.clone());
                    Lifecycle::Authenticated(written.tokens)
                }
                Err(e) => {
                    log::error!("[oidc] {e:#}");
                    Lifecycle::Unauthenticated {
                        reason: AuthError::request(format!("{e:#}")),
                    }
                }
            },
            Err(AuthError::InvalidRefreshToken) => {
                log::info!("[oidc] Refresh token for {} rejected", self.identity.kind);
                self.begin_authorization()
            }
            Err(e) => {
                log::error!(
                    "[oidc] Could not classify refresh failure for {}: {}",
                    self.identity.kind,
                    e
                );
                Lifecycle::Unauthenticated { reason: e }
            }
        }
    }

    fn begin_authorization(&self) -> Lifecycle {
        if let Some(url) = self.pending_authorization() {
            log::info!(
                "[oidc] Still waiting for {} authorization at {}",
                self.identity.kind,
                url
            );
            return Lifecycle::AwaitingAuthorization { url };
        }
        match self.authorize() {
            Ok(url) => Lifecycle::AwaitingAuthorization { url },
            Err(e) => {
                log::error!("[oidc] {e}");
                Lifecycle::Unauthenticated { reason: e }
            }
        }
    }
}

/// Map a non-ok validate body to its classification.
///
/// Exact string match on `message`; the HTTP status is ignored.
fn classify_validate_failure(body: serde_json::Value) -> AuthError {
    match body.get("message").and_then(serde_json::Value::as_str) {
        Some(INVALID_ACCESS_TOKEN_MESSAGE) => AuthError::InvalidAccessToken,
        Some(MISSING_AUTHORIZATION_TOKEN_MESSAGE) => AuthError::MissingAuthorizationToken,
        _ => AuthError::Unknown(body),
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(RANDOM_ALPHABET[rng.random_range(0..RANDOM_ALPHABET.len())]))
        .collect()
}

/// Try to open the authorization URL in the user's browser.
fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()
            .context("Failed to open browser")?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()
            .context("Failed to open browser")?;
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()
            .context("Failed to open browser")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityKind;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(
            Identity {
                kind: IdentityKind::Bot,
                id: "123456789".to_string(),
                display_name: "test-bot".to_string(),
                scope: "chat:read chat:edit".to_string(),
            },
            ProviderConfig {
                base_url: "https://id.example.test/oauth2".to_string(),
                client_id: "client-abc".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost:3000/oauth/callback".to_string(),
                headless: true,
            },
            TokenFile::new(dir.path(), IdentityKind::Bot),
        )
    }

    #[test]
    fn test_state_format() {
        let state = CredentialStore::state("123456789", "chat:read chat:edit");
        let (random, rest) = state.split_at(9);
        assert!(random.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(rest, "-123456789-chat:read chat:edit");
    }

    #[test]
    fn test_nonce_format() {
        let nonce = CredentialStore::nonce();
        assert_eq!(nonce.len(), 16);
        assert!(nonce.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_classify_validate_failure_exact_match() {
        assert_eq!(
            classify_validate_failure(serde_json::json!({"message": "invalid access token"})),
            AuthError::InvalidAccessToken
        );
        assert_eq!(
            classify_validate_failure(serde_json::json!({"message": "missing authorization token"})),
            AuthError::MissingAuthorizationToken
        );
        // Case differs: not a known shape
        let body = serde_json::json!({"message": "Invalid access token"});
        assert_eq!(classify_validate_failure(body.clone()), AuthError::Unknown(body));
    }

    #[test]
    fn test_authorization_url_carries_client_and_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = Url::parse(&store.authorization_url().unwrap()).unwrap();

        assert_eq!(url.path(), "/oauth2/authorize");
        let params: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-abc");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "chat:read chat:edit");
        assert!(params["state"].ends_with("-123456789-chat:read chat:edit"));
        assert_eq!(params["nonce"].len(), 16);
    }

    #[tokio::test]
    async fn test_complete_authorization_rejects_unknown_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.authorization_url().unwrap();

        let result = store.complete_authorization("forged-state", "code").await;
        assert_eq!(result, Err(AuthError::StateMismatch));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let result = store.refresh().await;
        assert_eq!(
            result,
            Err(AuthError::Request {
                message: "No refresh token available".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_accept_persists_and_emits() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let pair = TokenPair {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
        };

        let written = store.accept(&pair).unwrap();
        assert_eq!(written.path, dir.path().join("bot.json"));
        assert_eq!(store.wait_authenticated().await, pair);
        assert_eq!(TokenFile::new(dir.path(), IdentityKind::Bot).read(), Some(pair));
    }

    #[tokio::test]
    async fn test_lifecycle_without_tokens_authorizes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        match store.run_lifecycle().await {
            Lifecycle::AwaitingAuthorization { url } => {
                assert!(url.contains("client_id=client-abc"));
            }
            other => panic!("expected authorization, got {other:?}"),
        }
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_repeated_renewal_reuses_outstanding_url() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let Lifecycle::AwaitingAuthorization { url: first } = store.run_lifecycle().await else {
            panic!("expected authorization");
        };
        let Lifecycle::AwaitingAuthorization { url: second } = store.ensure_authenticated().await
        else {
            panic!("expected authorization");
        };
        assert_eq!(first, second);
        assert_eq!(store.pending_authorization(), Some(first));

        // An explicit authorize() still issues a new link
        let third = store.authorize().unwrap();
        assert_ne!(third, second);
        assert_eq!(store.pending_authorization(), Some(third));
    }
}
