//! Contract with the identity library that performs the actual OAuth handshakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes that can be resolved by sending the user through an interactive flow.
const INTERACTION_REQUIRED_CODES: [&str; 3] =
    ["consent_required", "interaction_required", "login_required"];

/// Error reported by the identity library.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct IdentityError {
    /// Machine readable code, e.g. `login_required`.
    pub code: String,
    pub message: String,
}

impl IdentityError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if user interaction (a redirect) can resolve this error.
    pub fn requires_interaction(&self) -> bool {
        INTERACTION_REQUIRED_CODES.contains(&self.code.as_str())
    }
}

/// Signed-in account as resolved by the identity library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub home_account_id: String,
    pub username: String,
    pub name: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub id_token_claims: serde_json::Map<String, serde_json::Value>,
}

/// Scopes requested for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub scopes: Vec<String>,
}

impl TokenRequest {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Successful token acquisition.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub id_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_on: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub account: Option<Account>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_on", &self.expires_on)
            .field("scopes", &self.scopes)
            .field("account", &self.account)
            .finish()
    }
}

/// The identity library (MSAL or equivalent).
///
/// Redirect methods navigate away from the application; their completion is
/// observed on the next load through [`IdentityClient::handle_redirect_callback`].
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn login_redirect(&self, request: &TokenRequest) -> Result<(), IdentityError>;

    async fn acquire_token_silent(
        &self,
        request: &TokenRequest,
    ) -> Result<AuthResponse, IdentityError>;

    async fn acquire_token_redirect(&self, request: &TokenRequest) -> Result<(), IdentityError>;

    async fn logout(&self) -> Result<(), IdentityError>;

    fn account(&self) -> Option<Account>;

    /// Outcome of a redirect that completed on this load, if any.
    async fn handle_redirect_callback(&self) -> Option<Result<AuthResponse, IdentityError>>;
}
