//! Host environment capabilities.
//!
//! The session never reads ambient globals (current location, browser storage);
//! everything comes through an [`Environment`] injected at construction.

use std::sync::Arc;

use crate::store::KvStore;

pub trait Environment: Send + Sync {
    /// True when the current navigation carries an identity provider response,
    /// i.e. this load is the completion of a redirect.
    fn current_location_has_auth_response(&self) -> bool;

    /// The current location, used as default redirect URI.
    fn redirect_uri(&self) -> String;

    /// The persistent store scoped to this origin.
    fn store(&self) -> Arc<dyn KvStore>;
}

/// Value-backed environment for native hosts and tests.
pub struct StaticEnvironment {
    redirect_uri: String,
    has_auth_response: bool,
    store: Arc<dyn KvStore>,
}

impl StaticEnvironment {
    pub fn new(redirect_uri: impl Into<String>, store: Arc<dyn KvStore>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            has_auth_response: false,
            store,
        }
    }

    /// Mark the current location as a redirect completion.
    pub fn with_auth_response(mut self, has_auth_response: bool) -> Self {
        self.has_auth_response = has_auth_response;
        self
    }
}

impl Environment for StaticEnvironment {
    fn current_location_has_auth_response(&self) -> bool {
        self.has_auth_response
    }

    fn redirect_uri(&self) -> String {
        self.redirect_uri.clone()
    }

    fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }
}
