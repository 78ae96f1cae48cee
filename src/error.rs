//! Error types for the azuresession crate.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

pub use crate::auth::identity::IdentityError;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors. These are fatal and only raised during construction.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("auth.client_id is required")]
    MissingClientId,

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Microsoft Graph request errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    /// Maps a non-success HTTP status to an error.
    pub(crate) fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            // Don't expose raw API error details - just the status code
            status => Self::GraphRequestFailed(format!("HTTP {}", status)),
        }
    }
}

/// Key-value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read store: {0}")]
    ReadFailed(String),

    #[error("Failed to write store: {0}")]
    WriteFailed(String),

    #[error("Failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl AppError {
    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Config(_) => "Configuration error. Please check settings.",
            Self::Identity(e) if e.requires_interaction() => "Please sign in again.",
            Self::Identity(_) => "Sign-in failed. Please try again.",
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Store(_) => "Failed to save session data.",
            Self::Network(_) | Self::Api(ApiError::Network(_)) => {
                "Network error. Check your connection."
            }
            _ => "An error occurred. Please try again.",
        }
    }

    /// Returns true if this error should trigger a sign-out.
    pub fn requires_sign_out(&self) -> bool {
        match self {
            Self::Api(ApiError::Unauthorized) => true,
            Self::Identity(e) => e.requires_interaction(),
            _ => false,
        }
    }
}
