//! Events delivered to user supplied handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::identity::{AuthResponse, IdentityError};

/// The closed set of events a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Authentication,
    Token,
    GraphResponse,
}

impl EventKind {
    /// Stable name, used as prefix of queue entry ids.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Authentication => "auth.onAuthentication",
            Self::Token => "auth.onToken",
            Self::GraphResponse => "graph.onResponse",
        }
    }
}

/// Event payload. Persisted as part of the callback queue, so variants must stay
/// deserializable across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackEvent {
    /// A login redirect completed.
    Authentication {
        error: Option<IdentityError>,
        response: Option<AuthResponse>,
    },
    /// A new token was acquired, or silent acquisition failed terminally.
    Token {
        error: Option<IdentityError>,
        response: Option<AuthResponse>,
    },
    /// Graph results after an initial graph call.
    GraphResponse { results: Map<String, Value> },
}

impl CallbackEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Authentication { .. } => EventKind::Authentication,
            Self::Token { .. } => EventKind::Token,
            Self::GraphResponse { .. } => EventKind::GraphResponse,
        }
    }
}

/// A pending handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub event: CallbackEvent,
}
