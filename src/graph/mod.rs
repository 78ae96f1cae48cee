//! Microsoft Graph request planning, execution and caching.

pub mod cache;
pub mod client;
pub mod endpoint;
pub mod planner;

pub use cache::GraphCache;
pub use client::{BatchResult, GraphClient, GraphOutput, GraphResponse};
pub use endpoint::{Endpoint, EndpointSpec, GraphEndpoints};
pub use planner::{categorize, CategorizedRequests, GraphPlanner};
