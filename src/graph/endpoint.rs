//! Declarative Microsoft Graph endpoint descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::ApiError;

/// An endpoint as written by the caller: a bare URL or a detailed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Url(String),
    Detailed(EndpointSpec),
}

/// Detailed endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Always re-fetch; never read from nor written to the results cache.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
    /// Batch this endpoint with others of the same group. The group value is the
    /// base URL the `$batch` call is posted to, `default` meaning the configured
    /// graph base URL.
    #[serde(default, alias = "batchUrl", skip_serializing_if = "Option::is_none")]
    pub batch_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Further transport options, forwarded as-is in batch requests.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Endpoint {
    /// Normalize into a detailed descriptor. An endpoint without URL is rejected.
    pub fn normalize(&self) -> Result<EndpointSpec, ApiError> {
        let spec = match self {
            Self::Url(url) => EndpointSpec {
                url: url.clone(),
                ..Default::default()
            },
            Self::Detailed(spec) => spec.clone(),
        };

        if spec.url.trim().is_empty() {
            return Err(ApiError::InvalidEndpoint("invalid endpoint url".into()));
        }
        Ok(spec)
    }
}

impl From<&str> for Endpoint {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<EndpointSpec> for Endpoint {
    fn from(spec: EndpointSpec) -> Self {
        Self::Detailed(spec)
    }
}

impl EndpointSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn in_batch(mut self, group: impl Into<String>) -> Self {
        self.batch_group = Some(group.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// HTTP method, `GET` unless specified.
    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| "GET".to_string())
    }

    /// The URL to call: absolute URLs are used as-is, anything else is appended to `base_url`.
    pub fn resolve_url(&self, base_url: &str) -> String {
        if is_absolute(&self.url) {
            self.url.clone()
        } else {
            format!("{}{}", base_url, self.url)
        }
    }
}

fn is_absolute(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Input of a direct graph call: one endpoint, or several to batch.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEndpoints {
    Single(Endpoint),
    Batch(Vec<Endpoint>),
}

impl From<Endpoint> for GraphEndpoints {
    fn from(endpoint: Endpoint) -> Self {
        Self::Single(endpoint)
    }
}

impl From<Vec<Endpoint>> for GraphEndpoints {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        Self::Batch(endpoints)
    }
}
