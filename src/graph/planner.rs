//! Plans a declarative set of named endpoints into as few round trips as possible.
//!
//! Endpoints already present in the token-scoped cache are skipped unless marked
//! `force`. The rest are issued individually, or merged into one `$batch` request
//! per batch group. All requests run concurrently.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::cache::GraphCache;
use super::client::GraphClient;
use super::endpoint::{Endpoint, EndpointSpec};
use crate::error::ApiError;
use crate::store::KvStore;

/// Batch group posting to the configured graph base URL.
pub const DEFAULT_BATCH_GROUP: &str = "default";

/// Endpoints that still need fetching, split by how they are issued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorizedRequests {
    pub single_requests: Vec<EndpointSpec>,
    pub batch_requests: BTreeMap<String, Vec<EndpointSpec>>,
}

/// Split `endpoints` not in `exclude` into individual and batched requests.
///
/// Every returned descriptor carries its map key as id, so an explicit `id` in a
/// descriptor is ignored here; batched descriptors lose their group tag.
pub fn categorize(
    endpoints: &BTreeMap<String, EndpointSpec>,
    exclude: &BTreeSet<String>,
) -> CategorizedRequests {
    let mut categorized = CategorizedRequests::default();

    for (id, spec) in endpoints {
        if exclude.contains(id) {
            continue;
        }

        let mut spec = spec.clone();
        spec.id = Some(id.clone());

        match spec.batch_group.take() {
            Some(group) => categorized
                .batch_requests
                .entry(group)
                .or_default()
                .push(spec),
            None => categorized.single_requests.push(spec),
        }
    }

    categorized
}

/// Runs planned graph calls and maintains the results cache.
pub struct GraphPlanner {
    client: GraphClient,
}

impl GraphPlanner {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    /// Fetch every endpoint not already cached for `access_token`, merge with the
    /// cached results and persist the cacheable part.
    ///
    /// Any request failure aborts the whole call and leaves the cache untouched.
    pub async fn run(
        &self,
        access_token: &str,
        store: &dyn KvStore,
        endpoints: &BTreeMap<String, Endpoint>,
    ) -> Result<Map<String, Value>, ApiError> {
        let mut specs = BTreeMap::new();
        let mut forced = BTreeSet::new();
        for (id, endpoint) in endpoints {
            let spec = endpoint.normalize()?;
            if spec.force {
                forced.insert(id.clone());
            }
            specs.insert(id.clone(), spec);
        }

        let cache = GraphCache::for_token(access_token);
        let mut results = cache.load(store);
        let satisfied: BTreeSet<String> = results
            .keys()
            .filter(|id| !forced.contains(id.as_str()))
            .cloned()
            .collect();

        let plan = categorize(&specs, &satisfied);
        info!(
            "Graph call: {} cached, {} single, {} batch group(s)",
            satisfied.len(),
            plan.single_requests.len(),
            plan.batch_requests.len()
        );

        let singles = try_join_all(
            plan.single_requests
                .into_iter()
                .map(|spec| self.fetch_single(access_token, spec)),
        );
        let batches = try_join_all(
            plan.batch_requests
                .into_iter()
                .map(|(group, specs)| self.fetch_batch(access_token, group, specs)),
        );
        let (singles, batches) = tokio::try_join!(singles, batches)?;

        for (id, body) in singles.into_iter().chain(batches.into_iter().flatten()) {
            results.insert(id, body);
        }

        if let Err(e) = cache.save(store, &results, &forced) {
            warn!("Failed to cache graph results: {}", e);
        }

        Ok(results)
    }

    async fn fetch_single(
        &self,
        access_token: &str,
        spec: EndpointSpec,
    ) -> Result<(String, Value), ApiError> {
        let id = spec.id.clone().unwrap_or_default();
        let response = self
            .client
            .execute_single(access_token, &Endpoint::Detailed(spec))
            .await?;
        debug!("Graph endpoint '{}' returned HTTP {}", id, response.status);
        Ok((id, response.body))
    }

    async fn fetch_batch(
        &self,
        access_token: &str,
        group: String,
        specs: Vec<EndpointSpec>,
    ) -> Result<Vec<(String, Value)>, ApiError> {
        let batch_url = (group != DEFAULT_BATCH_GROUP).then_some(group);
        let endpoints: Vec<Endpoint> = specs.into_iter().map(Endpoint::Detailed).collect();
        let result = self
            .client
            .execute_batch(access_token, &endpoints, batch_url.as_deref())
            .await?;
        Ok(result.into_bodies())
    }
}
