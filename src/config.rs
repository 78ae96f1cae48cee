//! Configuration loading and management.
//!
//! Documented defaults live in the embedded config.toml. Caller supplied TOML is
//! merged onto them section by section, and environment variables can override the
//! auth section.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::environment::Environment;
use crate::error::ConfigError;
use crate::graph::endpoint::Endpoint;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub request: RequestConfig,
    pub graph: GraphConfig,
    pub cache: CacheConfig,
    pub system: SystemConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub redirect_uri: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub navigate_to_login_request_url: bool,
    pub require_auth_on_initialize: bool,
    pub auto_refresh_token: bool,
}

/// Default token request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub call_after_init: bool,
    pub base_url: String,
    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,
}

/// Cache options, forwarded verbatim to the identity library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_location: String,
    pub store_auth_state_in_cookie: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub token_renewal_offset_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Construction parameters for an identity library implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySettings {
    pub client_id: String,
    pub authority: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: String,
    pub navigate_to_login_request_url: bool,
    pub cache_location: String,
    pub store_auth_state_in_cookie: bool,
    pub cache_extra: BTreeMap<String, serde_json::Value>,
    pub token_renewal_offset_seconds: u64,
}

impl Config {
    /// Load the embedded defaults with environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        // .env is optional
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                debug!("Failed to load .env file: {}", e);
            }
        }

        let mut config = Self::defaults()?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.auth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.auth.tenant_id = tenant;
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.auth.redirect_uri = Some(redirect_uri);
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Merge a TOML document onto the embedded defaults and validate the result.
    pub fn from_toml_str(overrides: &str) -> Result<Self, ConfigError> {
        let defaults = parse_table(CONFIG_TOML)?;
        let overrides = parse_table(overrides)?;

        let config: Config = toml::Value::Table(merge_sections(defaults, overrides))
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and merge it onto the embedded defaults.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The embedded defaults, without validation.
    fn defaults() -> Result<Self, ConfigError> {
        toml::from_str(CONFIG_TOML).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        Ok(())
    }

    /// Authority URL for the configured tenant.
    pub fn authority(&self) -> String {
        format!("https://{}/{}", self.auth.tenant_name, self.auth.tenant_id)
    }

    /// Settings an identity library needs, with redirect URIs resolved against
    /// the environment's current location.
    pub fn identity_settings(&self, environment: &dyn Environment) -> IdentitySettings {
        let current = environment.redirect_uri();
        IdentitySettings {
            client_id: self.auth.client_id.clone(),
            authority: self.authority(),
            redirect_uri: self
                .auth
                .redirect_uri
                .clone()
                .unwrap_or_else(|| current.clone()),
            post_logout_redirect_uri: self
                .auth
                .post_logout_redirect_uri
                .clone()
                .unwrap_or(current),
            navigate_to_login_request_url: self.auth.navigate_to_login_request_url,
            cache_location: self.cache.cache_location.clone(),
            store_auth_state_in_cookie: self.cache.store_auth_state_in_cookie,
            cache_extra: self.cache.extra.clone(),
            token_renewal_offset_seconds: self.system.token_renewal_offset_seconds,
        }
    }
}

fn parse_table(content: &str) -> Result<toml::Table, ConfigError> {
    content
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Overlay `overrides` onto `defaults` one section deep: keys inside a section
/// replace the default value wholesale.
fn merge_sections(mut defaults: toml::Table, overrides: toml::Table) -> toml::Table {
    for (section, value) in overrides {
        match (defaults.get_mut(&section), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                existing.extend(incoming);
            }
            (_, value) => {
                defaults.insert(section, value);
            }
        }
    }
    defaults
}
