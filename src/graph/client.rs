//! Microsoft Graph HTTP client: individual requests and `$batch` requests.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use super::endpoint::{Endpoint, GraphEndpoints};
use crate::error::ApiError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Id prefix for batch members without an explicit id.
pub const DEFAULT_ID_PREFIX: &str = "defaultID-";

/// Raw response of an individual request.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Demultiplexed `$batch` response.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    /// Member responses keyed by id.
    Keyed(Map<String, Value>),
    /// Member responses in request order, when every id was positional.
    Sequence(Vec<Value>),
}

impl BatchResult {
    /// Build from responses keyed by id, recovering a plain sequence when the ids
    /// (with any `defaultID-` prefix stripped) are exactly `0..n`.
    pub fn from_keyed(responses: Map<String, Value>) -> Self {
        let mut indexed = Vec::with_capacity(responses.len());
        for key in responses.keys() {
            let position = key.strip_prefix(DEFAULT_ID_PREFIX).unwrap_or(key);
            match position.parse::<usize>() {
                Ok(index) => indexed.push((index, key.clone())),
                Err(_) => return Self::Keyed(responses),
            }
        }

        indexed.sort_unstable_by_key(|(index, _)| *index);
        let dense = indexed
            .iter()
            .enumerate()
            .all(|(position, (index, _))| position == *index);
        if !dense {
            return Self::Keyed(responses);
        }

        let mut responses = responses;
        Self::Sequence(
            indexed
                .into_iter()
                .map(|(_, key)| responses.remove(&key).unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Body of every member response, keyed by id (or position).
    pub fn into_bodies(self) -> Vec<(String, Value)> {
        match self {
            Self::Keyed(responses) => responses
                .into_iter()
                .map(|(id, response)| (id, body_of(response)))
                .collect(),
            Self::Sequence(responses) => responses
                .into_iter()
                .enumerate()
                .map(|(index, response)| (index.to_string(), body_of(response)))
                .collect(),
        }
    }
}

fn body_of(mut response: Value) -> Value {
    response
        .as_object_mut()
        .and_then(|object| object.remove("body"))
        .unwrap_or(Value::Null)
}

/// Result of a direct graph call.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOutput {
    Single(GraphResponse),
    Batch(BatchResult),
}

#[derive(Debug, Deserialize)]
struct BatchResponseBody {
    responses: Vec<Map<String, Value>>,
}

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client. Relative endpoint URLs are resolved against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request, or one `$batch` request for a list of endpoints.
    pub async fn request(
        &self,
        access_token: &str,
        endpoints: GraphEndpoints,
        batch_url: Option<&str>,
    ) -> Result<GraphOutput, ApiError> {
        match endpoints {
            GraphEndpoints::Single(endpoint) => self
                .execute_single(access_token, &endpoint)
                .await
                .map(GraphOutput::Single),
            GraphEndpoints::Batch(endpoints) => self
                .execute_batch(access_token, &endpoints, batch_url)
                .await
                .map(GraphOutput::Batch),
        }
    }

    /// Issue a single request with bearer authentication.
    ///
    /// Fails with [`ApiError::InvalidEndpoint`] for transport options a single
    /// request cannot carry.
    pub async fn execute_single(
        &self,
        access_token: &str,
        endpoint: &Endpoint,
    ) -> Result<GraphResponse, ApiError> {
        let spec = endpoint.normalize()?;
        let method = Method::from_bytes(spec.method().as_bytes())
            .map_err(|_| ApiError::InvalidEndpoint(format!("invalid method {}", spec.method())))?;
        let url = spec.resolve_url(&self.base_url);

        debug!("Graph request {} {}", method, url);

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(access_token);
        for (name, value) in spec.headers.iter().flatten() {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }
        let request = apply_options(request, &spec.options)?;

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Graph request to {} failed: HTTP {} - {}", url, status, body);
            return Err(ApiError::from_status(status.as_u16()));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;

        Ok(GraphResponse {
            status: status.as_u16(),
            headers,
            body: parse_body(&text),
        })
    }

    /// Post all `endpoints` as one `$batch` request to `batch_url` (the configured
    /// base URL when `None`) and demultiplex the responses by id.
    pub async fn execute_batch(
        &self,
        access_token: &str,
        endpoints: &[Endpoint],
        batch_url: Option<&str>,
    ) -> Result<BatchResult, ApiError> {
        let requests = endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| batch_member(endpoint, index))
            .collect::<Result<Vec<_>, _>>()?;

        let url = format!(
            "{}/$batch",
            batch_url.unwrap_or(&self.base_url).trim_end_matches('/')
        );
        debug!("Graph batch request with {} members to {}", requests.len(), url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&json!({ "requests": requests }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Graph batch request failed: HTTP {} - {}", status, body);
            return Err(ApiError::from_status(status.as_u16()));
        }

        let body: BatchResponseBody = response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;

        let mut keyed = Map::new();
        for mut member in body.responses {
            let id = match member.remove("id") {
                Some(Value::String(id)) => id,
                Some(other) => other.to_string(),
                None => {
                    return Err(ApiError::ParseFailed(
                        "batch response member without id".into(),
                    ))
                }
            };
            keyed.insert(id, Value::Object(member));
        }

        Ok(BatchResult::from_keyed(keyed))
    }
}

/// One entry of a `$batch` request body.
fn batch_member(endpoint: &Endpoint, index: usize) -> Result<Value, ApiError> {
    let spec = endpoint.normalize()?;

    let mut member = spec.options.clone();
    member.insert(
        "id".into(),
        Value::String(
            spec.id
                .clone()
                .unwrap_or_else(|| format!("{}{}", DEFAULT_ID_PREFIX, index)),
        ),
    );
    member.insert("method".into(), Value::String(spec.method()));
    member.insert("url".into(), Value::String(spec.url.clone()));
    if let Some(headers) = &spec.headers {
        member.insert("headers".into(), json!(headers));
    }
    if let Some(body) = &spec.body {
        member.insert("body".into(), body.clone());
    }
    Ok(Value::Object(member))
}

/// Apply a descriptor's transport options to a single request: `params` (or
/// `query`) as query parameters and `timeout` in milliseconds.
fn apply_options(
    mut request: RequestBuilder,
    options: &Map<String, Value>,
) -> Result<RequestBuilder, ApiError> {
    for (name, value) in options {
        request = match name.as_str() {
            "params" | "query" => request.query(&query_pairs(name, value)?),
            "timeout" => {
                let millis = value.as_u64().ok_or_else(|| unsupported_option(name, value))?;
                request.timeout(Duration::from_millis(millis))
            }
            _ => return Err(unsupported_option(name, value)),
        };
    }
    Ok(request)
}

fn query_pairs(name: &str, params: &Value) -> Result<Vec<(String, String)>, ApiError> {
    let Some(params) = params.as_object() else {
        return Err(unsupported_option(name, params));
    };

    params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(unsupported_option(name, value)),
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn unsupported_option(name: &str, value: &Value) -> ApiError {
    warn!("Cannot apply request option '{}': {}", name, value);
    ApiError::InvalidEndpoint(format!("unsupported request option '{}'", name))
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
