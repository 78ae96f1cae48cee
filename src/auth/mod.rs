//! Azure AD session handling.
//!
//! Wraps an identity library behind [`IdentityClient`] and keeps the session
//! state, token renewal and lifecycle callbacks in [`SessionManager`].

pub mod expiration;
pub mod identity;
pub mod session;

pub use identity::{Account, AuthResponse, IdentityClient, IdentityError, TokenRequest};
pub use session::{SessionManager, SessionPhase, SessionState};
