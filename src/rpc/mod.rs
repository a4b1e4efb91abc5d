//! RPC layer: services, server dispatch and the client.
//!
//! # Data Flow
//! ```text
//! Server:
//!     Listener → serve_connection → TracedProtocol::server
//!         → Service::route → handler (inside the caller's call chain)
//!         → reply (+ ResponseHeader when enhanced)
//!
//! Client:
//!     Client::call → TracedProtocol::client (probe on first write)
//!         → request (+ RequestHeader when enhanced) → reply
//! ```

pub mod client;
mod responder;
pub mod server;
pub mod service;

pub use client::{Client, ClientError};
pub use server::{serve_connection, RpcServer, ServerError};
pub use service::{Route, Service, ServiceBuilder, ServiceError};
