//! Trace context propagation.
//!
//! # Data Flow
//! ```text
//! outbound message (enhanced) → scope.rs enter_span → stack.rs push
//!     → id.rs child of current top, or root decided by sampling.rs
//!     → RequestHeader on the wire
//! exchange complete → SpanGuard dropped → stack.rs pop restores the parent
//!
//! inbound request (enhanced) → RequestHeader → CallContext::from_request
//!     → handler's outbound calls become children of the caller's span
//! ```
//!
//! # Design Decisions
//! - Context lives in a tokio task-local with an explicit scope, never a global
//! - Sampling is decided once per root and inherited
//! - Push/pop are paired through a guard so error paths restore the parent

pub mod id;
pub mod sampling;
pub mod scope;
pub mod stack;

pub use id::TraceId;
pub use sampling::Sampler;
pub use scope::{
    caller, current, depth, in_scope, last_response, scope, set_broadcast, CallContext, SpanGuard,
};
pub use stack::TraceStack;
