//! Trace-propagating Thrift RPC.
//!
//! Clients probe each connection once with a reserved method. A peer that
//! accepts switches the connection to the enhanced protocol, where every
//! message is prefixed by a trace header; a peer that refuses keeps the plain
//! binary protocol, byte for byte.

pub mod codec;
pub mod config;
pub mod demo;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod rpc;
pub mod trace;
pub mod transport;

pub use config::AppConfig;
pub use lifecycle::Shutdown;
pub use protocol::UpgradeState;
pub use rpc::{Client, RpcServer, ServiceBuilder};
