//! Session manager: sign-in state, token freshness and lifecycle events.
//!
//! ```text
//! Unauthenticated --sign_in--> RedirectPending --redirect completes--> Authenticated
//! Authenticated --sign_out--> Unauthenticated
//! Authenticated: TokenValid --timer--> TokenRefreshing --> TokenValid | InteractionRequired
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use zeroize::Zeroize;

use super::expiration::{renewal_delay, ExpirationTask, ExpirationTimer};
use super::identity::{Account, AuthResponse, IdentityClient, TokenRequest};
use crate::callbacks::handlers::SignOutHook;
use crate::callbacks::{CallbackEvent, CallbackQueue, HandlerRegistry, Handlers, QueueEntry};
use crate::config::{Config, IdentitySettings};
use crate::custom;
use crate::environment::Environment;
use crate::error::{ApiError, AppError, StoreError};
use crate::graph::{Endpoint, GraphClient, GraphEndpoints, GraphOutput, GraphPlanner};
use crate::store::KvStore;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Unauthenticated,
    /// A login redirect was started.
    RedirectPending,
    Authenticated,
    /// The held token expired and is being renewed silently.
    TokenRefreshing,
    /// Silent acquisition needs the user; a token redirect was started.
    InteractionRequired,
}

/// Observable session state.
///
/// `access_token` is empty whenever `is_authenticated` is false.
#[derive(Clone, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub is_authenticated: bool,
    pub access_token: String,
    pub user: Option<Account>,
    pub graph: Map<String, Value>,
    pub custom: Map<String, Value>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Unauthenticated,
            is_authenticated: false,
            access_token: String::new(),
            user: None,
            graph: Map::new(),
            custom: Map::new(),
        }
    }

    fn clear_token(&mut self) {
        self.access_token.zeroize();
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("phase", &self.phase)
            .field("is_authenticated", &self.is_authenticated)
            .field("has_access_token", &!self.access_token.is_empty())
            .field("user", &self.user)
            .field("graph", &self.graph.keys().collect::<Vec<_>>())
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Owns the authentication state of one application session.
pub struct SessionManager {
    config: Config,
    identity: Arc<dyn IdentityClient>,
    environment: Arc<dyn Environment>,
    store: Arc<dyn KvStore>,
    state: Mutex<SessionState>,
    callbacks: CallbackQueue,
    sign_out_hook: Option<SignOutHook>,
    graph: GraphPlanner,
    expiration: Mutex<ExpirationTimer>,
    /// Bumped on sign-out. Token work started under an older value is discarded.
    generation: AtomicU64,
    this: Weak<SessionManager>,
}

impl SessionManager {
    /// Create a session manager.
    ///
    /// Fails on invalid configuration before touching storage or the network.
    /// Call [`SessionManager::initialize`] afterwards.
    pub fn new(
        config: Config,
        handlers: Handlers,
        identity: Arc<dyn IdentityClient>,
        environment: Arc<dyn Environment>,
    ) -> Result<Arc<Self>, AppError> {
        config.validate()?;

        let graph = GraphPlanner::new(GraphClient::new(config.graph.base_url.clone())?);
        let store = environment.store();
        let callbacks =
            CallbackQueue::new(HandlerRegistry::from_handlers(&handlers), Arc::clone(&store));

        Ok(Arc::new_cyclic(|this| Self {
            config,
            identity,
            environment,
            store,
            state: Mutex::new(SessionState::new()),
            callbacks,
            sign_out_hook: handlers.sign_out_hook(),
            graph,
            expiration: Mutex::new(ExpirationTimer::new()),
            generation: AtomicU64::new(0),
            this: this.clone(),
        }))
    }

    /// Restore persisted state, deliver pending callbacks and, when already signed
    /// in, acquire a token (and run the initial graph call if configured).
    pub async fn initialize(&self) {
        info!("Initializing session for client {}", self.config.auth.client_id);

        let stored_custom = custom::load(self.store.as_ref());
        self.update_state(|s| s.custom = stored_custom);

        // Read before anything is pushed, so nothing persisted is overwritten
        let persisted = self.callbacks.load_persisted();
        let mut queue: Vec<QueueEntry> = Vec::new();
        if let Some(outcome) = self.identity.handle_redirect_callback().await {
            let (error, response) = match outcome {
                Ok(response) => {
                    info!("Login redirect completed");
                    (None, Some(response))
                }
                Err(e) => {
                    warn!("Login redirect completed with error: {}", e);
                    (Some(e), None)
                }
            };
            queue.extend(
                self.callbacks
                    .create_entry(CallbackEvent::Authentication { error, response }),
            );
        }
        queue.extend(persisted);
        self.callbacks.restore(queue);
        self.flush_callbacks().await;

        if self.config.auth.require_auth_on_initialize {
            if let Err(e) = self.sign_in().await {
                error!("Sign-in on initialize failed: {}", e);
            }
        }

        let authenticated = self.is_authenticated();
        self.update_state(|s| {
            s.is_authenticated = authenticated;
            if authenticated {
                s.phase = SessionPhase::Authenticated;
            }
        });

        if authenticated {
            let account = self.identity.account();
            self.update_state(|s| s.user = account);

            let token = self.acquire_token(None).await;
            if token.is_some() && self.config.graph.call_after_init {
                self.initial_graph_call().await;
            }
        }
    }

    /// Start the interactive login redirect.
    ///
    /// No-op while a redirect is completing or when an account is already signed in.
    pub async fn sign_in(&self) -> Result<(), AppError> {
        if self.environment.current_location_has_auth_response() {
            debug!("Sign-in skipped: redirect completion in progress");
            return Ok(());
        }
        if self.identity.account().is_some() {
            debug!("Sign-in skipped: account already signed in");
            return Ok(());
        }

        info!("Starting login redirect");
        self.update_state(|s| s.phase = SessionPhase::RedirectPending);
        if let Err(e) = self.identity.login_redirect(&self.default_request()).await {
            self.update_state(|s| s.phase = SessionPhase::Unauthenticated);
            return Err(e.into());
        }
        Ok(())
    }

    /// Run the before-sign-out hook, then log out and clear the local session.
    ///
    /// Token acquisitions still in flight are discarded when they complete.
    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let (Some(hook), Some(ctx)) = (&self.sign_out_hook, self.this.upgrade()) {
            if let Err(e) = hook(ctx).await {
                warn!("beforeSignOut hook failed: {}", e);
            }
        }

        info!("Signing out");
        let result = self.identity.logout().await;

        self.lock_expiration().cancel();
        self.update_state(|s| {
            s.clear_token();
            s.is_authenticated = false;
            s.user = None;
            s.graph.clear();
            s.phase = SessionPhase::Unauthenticated;
        });

        result.map_err(Into::into)
    }

    /// Signed in and not in the middle of a redirect completion.
    pub fn is_authenticated(&self) -> bool {
        !self.environment.current_location_has_auth_response() && self.identity.account().is_some()
    }

    /// Acquire a token silently, falling back to an interactive redirect when the
    /// identity provider requires user interaction.
    ///
    /// Returns `None` when no token could be obtained; terminal failures are
    /// reported through the token handler.
    pub async fn acquire_token(&self, request: Option<TokenRequest>) -> Option<String> {
        let request = request.unwrap_or_else(|| self.default_request());
        let generation = self.generation();

        let result = self.identity.acquire_token_silent(&request).await;
        if self.generation() != generation {
            debug!("Signed out while acquiring a token, discarding the result");
            return None;
        }

        match result {
            Ok(response) => {
                let changed = self.update_state(|s| s.access_token != response.access_token);
                if changed {
                    self.set_access_token(&response);
                    self.save_callback(CallbackEvent::Token {
                        error: None,
                        response: Some(response.clone()),
                    })
                    .await;
                } else {
                    self.end_refresh();
                }
                Some(response.access_token)
            }
            Err(error) if error.requires_interaction() => {
                info!("Token requires interaction ({}), starting redirect", error.code);
                self.update_state(|s| s.phase = SessionPhase::InteractionRequired);
                if let Err(e) = self.identity.acquire_token_redirect(&request).await {
                    error!("Token redirect failed: {}", e);
                }
                None
            }
            Err(error) => {
                warn!("Silent token acquisition failed: {}", error);
                self.end_refresh();
                self.save_callback(CallbackEvent::Token {
                    error: Some(error),
                    response: None,
                })
                .await;
                None
            }
        }
    }

    fn set_access_token(&self, response: &AuthResponse) {
        self.update_state(|s| {
            s.clear_token();
            s.access_token = response.access_token.clone();
            s.is_authenticated = true;
            s.phase = SessionPhase::Authenticated;
            if s.user.is_none() {
                s.user = response.account.clone();
            }
        });

        let delay = renewal_delay(
            response.expires_on,
            Utc::now(),
            self.config.system.token_renewal_offset_seconds,
        );
        let task = Self::expiration_task(
            self.this.clone(),
            response.scopes.clone(),
            self.generation(),
        );
        self.lock_expiration().arm(delay, task);
    }

    fn expiration_task(this: Weak<Self>, scopes: Vec<String>, generation: u64) -> ExpirationTask {
        Box::pin(async move {
            if let Some(manager) = this.upgrade() {
                manager.on_token_expired(scopes, generation).await;
            }
        })
    }

    async fn on_token_expired(&self, scopes: Vec<String>, generation: u64) {
        if self.generation() != generation {
            debug!("Expiration task outlived its session, ignoring");
            return;
        }

        if self.config.auth.auto_refresh_token {
            info!("Access token expiring, renewing silently");
            self.update_state(|s| s.phase = SessionPhase::TokenRefreshing);
            self.acquire_token(Some(TokenRequest { scopes })).await;
        } else {
            info!("Access token expired");
            self.update_state(|s| s.clear_token());
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn end_refresh(&self) {
        self.update_state(|s| {
            if s.phase == SessionPhase::TokenRefreshing {
                s.phase = SessionPhase::Authenticated;
            }
        });
    }

    /// Whether a token expiration task is outstanding.
    pub fn has_pending_expiration(&self) -> bool {
        self.lock_expiration().is_armed()
    }

    // MS GRAPH

    /// Call the graph directly: one request, or one `$batch` request for a list.
    pub async fn ms_graph(
        &self,
        endpoints: impl Into<GraphEndpoints>,
        batch_url: Option<&str>,
    ) -> Result<GraphOutput, ApiError> {
        let token = self.access_token();
        self.graph
            .client()
            .request(&token, endpoints.into(), batch_url)
            .await
    }

    /// Fetch `endpoints` through the cache-aware planner, publish the results in
    /// the session state and notify the graph response handler.
    pub async fn call_graph(
        &self,
        endpoints: &BTreeMap<String, Endpoint>,
    ) -> Result<Map<String, Value>, ApiError> {
        let token = self.access_token();
        let results = self.graph.run(&token, self.store.as_ref(), endpoints).await?;

        self.update_state(|s| s.graph = results.clone());
        self.save_callback(CallbackEvent::GraphResponse {
            results: results.clone(),
        })
        .await;
        Ok(results)
    }

    /// Run the configured endpoints. Failures are logged.
    pub async fn initial_graph_call(&self) {
        let endpoints = &self.config.graph.endpoints;
        if endpoints.is_empty() {
            debug!("No graph endpoints configured");
            return;
        }

        if let Err(e) = self.call_graph(endpoints).await {
            error!("Initial graph call failed: {}", e);
        }
    }

    // CUSTOM DATA

    /// Set one custom value and persist the whole custom map.
    pub fn save_custom_data(&self, key: impl Into<String>, value: Value) -> Result<(), StoreError> {
        let key = key.into();
        let data = self.update_state(|s| {
            s.custom.insert(key, value);
            s.custom.clone()
        });
        custom::store(self.store.as_ref(), &data)
    }

    /// Remove one custom value; the persisted entry goes away with the last value.
    pub fn remove_custom_data(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let (removed, data) = self.update_state(|s| (s.custom.remove(key), s.custom.clone()));
        custom::store(self.store.as_ref(), &data)?;
        Ok(removed)
    }

    pub fn custom_data(&self, key: &str) -> Option<Value> {
        self.update_state(|s| s.custom.get(key).cloned())
    }

    // CALLBACKS

    async fn save_callback(&self, event: CallbackEvent) {
        let Some(entry) = self.callbacks.push(event) else {
            return;
        };
        if let Some(ctx) = self.this.upgrade() {
            self.callbacks.execute(&ctx, vec![entry]).await;
        }
    }

    /// Retry every pending callback, in order.
    pub async fn flush_callbacks(&self) {
        let Some(ctx) = self.this.upgrade() else {
            return;
        };
        let pending = self.callbacks.pending();
        if !pending.is_empty() {
            debug!("Delivering {} pending callbacks", pending.len());
            self.callbacks.execute(&ctx, pending).await;
        }
    }

    pub fn pending_callbacks(&self) -> Vec<QueueEntry> {
        self.callbacks.pending()
    }

    // ACCESSORS

    /// Snapshot of the session state.
    pub fn state(&self) -> SessionState {
        self.update_state(|s| s.clone())
    }

    pub fn access_token(&self) -> String {
        self.update_state(|s| s.access_token.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parameters for constructing the identity library.
    pub fn identity_settings(&self) -> IdentitySettings {
        self.config.identity_settings(self.environment.as_ref())
    }

    fn default_request(&self) -> TokenRequest {
        TokenRequest::new(self.config.request.scopes.iter().cloned())
    }

    fn update_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn lock_expiration(&self) -> MutexGuard<'_, ExpirationTimer> {
        self.expiration.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.lock_expiration().cancel();
        self.update_state(|s| s.clear_token());
    }
}
