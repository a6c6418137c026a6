//! Credential lifecycle for the bot and broadcaster accounts.
//!
//! Each [`Identity`] owns one [`TokenPair`], persisted to a per-identity JSON
//! file and renewed against the identity provider. The lifecycle is driven by
//! a `listening` signal (the redirect receiver is ready) and ends in an
//! `authenticated` notification carrying the current pair; that notification
//! is the only thing that lets the chat and event-feed clients connect.
//!
//! ```text
//! listening → load ─┬─ no access token ─────────────→ authorize → (redirect) → exchange
//!                   └─ has token → validate ─┬─ valid ─────────────→ authenticated
//!                                            └─ invalid_access_token → refresh ─┬─ ok → authenticated
//!                                                                               └─ invalid_refresh_token → authorize
//! ```
//!
//! # Modules
//!
//! - [`oidc`] - [`CredentialStore`]: remote calls and the state machine
//! - [`storage`] - token file read/write

pub mod oidc;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use oidc::{CredentialStore, Lifecycle, ProviderConfig, Validation};
pub use storage::{TokenFile, TokenUpdate, Written};

/// Which account an identity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// The account that speaks in chat.
    Bot,
    /// The broadcaster account that owns the event feed.
    Caster,
}

impl IdentityKind {
    /// Lowercase name, also used as the token file stem.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Caster => "caster",
        }
    }
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IdentityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot" => Ok(Self::Bot),
            "caster" | "broadcaster" => Ok(Self::Caster),
            other => Err(format!("unknown identity kind: {other}")),
        }
    }
}

/// A credentialed account this system acts as. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Account kind.
    pub kind: IdentityKind,
    /// Platform user id.
    pub id: String,
    /// Login / display name.
    pub display_name: String,
    /// Space-separated scopes requested during authorization.
    pub scope: String,
}

/// Access + refresh bearer credentials for one identity.
///
/// An empty `access_token` means "unauthenticated".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Bearer token presented to chat and event-feed services.
    #[serde(default)]
    pub access_token: String,
    /// Token used to renew `access_token`.
    #[serde(default)]
    pub refresh_token: String,
}

impl TokenPair {
    /// Returns `true` when an access token is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Short, log-safe rendition of the access token.
    #[must_use]
    pub fn redacted(&self) -> String {
        redact(&self.access_token)
    }
}

/// Log-safe prefix of a secret.
pub(crate) fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "<empty>".to_string()
    } else {
        let prefix: String = secret.chars().take(4).collect();
        format!("{prefix}…")
    }
}

/// Failure of an identity-provider call.
///
/// Transport and decoding failures never escape as panics or raw errors;
/// they become [`AuthError::Request`] values with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Validation rejected: `"invalid access token"`.
    InvalidAccessToken,
    /// Validation rejected: `"missing authorization token"`.
    MissingAuthorizationToken,
    /// Refresh rejected with HTTP 400.
    InvalidRefreshToken,
    /// The provider answered with an error body of unrecognized shape.
    Unknown(serde_json::Value),
    /// The redirect's `state` does not match the one issued for this identity.
    StateMismatch,
    /// Transport, decoding, or precondition failure.
    Request {
        /// Human-readable description.
        message: String,
    },
}

impl AuthError {
    pub(crate) fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Machine-readable classification tag.
    #[must_use]
    pub fn known(&self) -> &'static str {
        match self {
            Self::InvalidAccessToken => "invalid_access_token",
            Self::MissingAuthorizationToken => "missing_authorization_token",
            Self::InvalidRefreshToken => "invalid_refresh_token",
            Self::Unknown(_) => "unknown",
            Self::StateMismatch => "state_mismatch",
            Self::Request { .. } => "error",
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAccessToken => write!(f, "invalid access token"),
            Self::MissingAuthorizationToken => write!(f, "missing authorization token"),
            Self::InvalidRefreshToken => write!(f, "invalid refresh token"),
            Self::Unknown(body) => write!(f, "unclassified provider error: {body}"),
            Self::StateMismatch => write!(f, "authorization state mismatch"),
            Self::Request { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AuthError {}
