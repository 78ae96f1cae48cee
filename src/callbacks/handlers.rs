//! User supplied lifecycle handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::{Map, Value};

use super::event::{CallbackEvent, EventKind};
use crate::auth::identity::{AuthResponse, IdentityError};
use crate::auth::session::SessionManager;

/// Future returned by every handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased queued event handler.
pub type EventHandler =
    Arc<dyn Fn(Arc<SessionManager>, CallbackEvent) -> HandlerFuture + Send + Sync>;

/// Hook awaited before signing out.
pub type SignOutHook = Arc<dyn Fn(Arc<SessionManager>) -> HandlerFuture + Send + Sync>;

/// Lifecycle handlers. Only events with a registered handler are ever queued.
#[derive(Clone, Default)]
pub struct Handlers {
    on_authentication: Option<EventHandler>,
    on_token: Option<EventHandler>,
    on_graph_response: Option<EventHandler>,
    before_sign_out: Option<SignOutHook>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the outcome of a completed login redirect.
    pub fn on_authentication<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<SessionManager>, Option<IdentityError>, Option<AuthResponse>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_authentication = Some(Arc::new(
            move |ctx: Arc<SessionManager>, event: CallbackEvent| -> HandlerFuture {
                match event {
                    CallbackEvent::Authentication { error, response } => {
                        Box::pin(handler(ctx, error, response))
                    }
                    other => mismatched(EventKind::Authentication, other),
                }
            },
        ));
        self
    }

    /// Called when a new token is acquired or silent acquisition fails.
    pub fn on_token<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<SessionManager>, Option<IdentityError>, Option<AuthResponse>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_token = Some(Arc::new(
            move |ctx: Arc<SessionManager>, event: CallbackEvent| -> HandlerFuture {
                match event {
                    CallbackEvent::Token { error, response } => {
                        Box::pin(handler(ctx, error, response))
                    }
                    other => mismatched(EventKind::Token, other),
                }
            },
        ));
        self
    }

    /// Called with the full results map after the initial graph call.
    pub fn on_graph_response<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<SessionManager>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_graph_response = Some(Arc::new(
            move |ctx: Arc<SessionManager>, event: CallbackEvent| -> HandlerFuture {
                match event {
                    CallbackEvent::GraphResponse { results } => Box::pin(handler(ctx, results)),
                    other => mismatched(EventKind::GraphResponse, other),
                }
            },
        ));
        self
    }

    /// Awaited before the identity library logs out.
    pub fn before_sign_out<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<SessionManager>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.before_sign_out = Some(Arc::new(
            move |ctx: Arc<SessionManager>| -> HandlerFuture { Box::pin(hook(ctx)) },
        ));
        self
    }

    pub(crate) fn sign_out_hook(&self) -> Option<SignOutHook> {
        self.before_sign_out.clone()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("on_authentication", &self.on_authentication.is_some())
            .field("on_token", &self.on_token.is_some())
            .field("on_graph_response", &self.on_graph_response.is_some())
            .field("before_sign_out", &self.before_sign_out.is_some())
            .finish()
    }
}

fn mismatched(expected: EventKind, event: CallbackEvent) -> HandlerFuture {
    let got = event.kind();
    Box::pin(async move {
        Err(anyhow!(
            "handler for '{}' received a '{}' event",
            expected.path(),
            got.path()
        ))
    })
}

/// Lookup table from event kind to handler, built once from [`Handlers`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, EventHandler>,
}

impl HandlerRegistry {
    pub fn from_handlers(handlers: &Handlers) -> Self {
        let handlers = [
            (EventKind::Authentication, &handlers.on_authentication),
            (EventKind::Token, &handlers.on_token),
            (EventKind::GraphResponse, &handlers.on_graph_response),
        ]
        .into_iter()
        .filter_map(|(kind, handler)| handler.clone().map(|h| (kind, h)))
        .collect();

        Self { handlers }
    }

    pub fn get(&self, kind: EventKind) -> Option<EventHandler> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_only_contains_present_handlers() {
        let handlers = Handlers::new()
            .on_token(|_ctx, _error, _response| async { anyhow::Ok(()) })
            .before_sign_out(|_ctx| async { anyhow::Ok(()) });

        let registry = HandlerRegistry::from_handlers(&handlers);
        assert!(registry.contains(EventKind::Token));
        assert!(!registry.contains(EventKind::Authentication));
        assert!(!registry.contains(EventKind::GraphResponse));
        assert!(handlers.sign_out_hook().is_some());
    }

    #[test]
    fn test_debug_lists_presence() {
        let handlers =
            Handlers::new().on_graph_response(|_ctx, _results| async { anyhow::Ok(()) });
        let debug = format!("{:?}", handlers);
        assert!(debug.contains("on_graph_response: true"));
        assert!(debug.contains("on_token: false"));
    }
}
