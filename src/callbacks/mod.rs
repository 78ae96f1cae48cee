//! Durable delivery of user supplied lifecycle handlers.
//!
//! Events are only queued when a handler is registered for them. The queue is
//! persisted so invocations that failed, or never ran because the process went
//! away, are retried on the next start.

pub mod event;
pub mod handlers;
pub mod queue;

pub use event::{CallbackEvent, EventKind, QueueEntry};
pub use handlers::{HandlerFuture, HandlerRegistry, Handlers};
pub use queue::CallbackQueue;
