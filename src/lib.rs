//! Session and token lifecycle management for Azure AD applications.
//!
//! Sign-in, silent token renewal, a durable queue of lifecycle callbacks, a
//! cache-aware Microsoft Graph request planner and a small persisted key/value
//! area for application data.

pub mod auth;
pub mod callbacks;
pub mod config;
pub mod custom;
pub mod environment;
pub mod error;
pub mod graph;
pub mod logging;
pub mod store;

pub use auth::{
    Account, AuthResponse, IdentityClient, SessionManager, SessionPhase, SessionState,
    TokenRequest,
};
pub use callbacks::{CallbackEvent, Handlers};
pub use config::Config;
pub use environment::{Environment, StaticEnvironment};
pub use error::{ApiError, AppError, ConfigError, IdentityError, StoreError};
pub use graph::{Endpoint, EndpointSpec, GraphEndpoints, GraphOutput};
pub use store::{FileStore, KvStore, MemoryStore};
