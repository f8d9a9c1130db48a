//! HTTP surface of the replica.
//!
//! Two kinds of endpoints share one router: the peer-to-peer consensus
//! endpoint (`POST /pbft/message`) and the client-facing surface (vote
//! submission, status, chain reads, testing controls, health, metrics).

mod handlers;
mod routes;
mod server;
pub mod types;

pub use handlers::RpcState;
pub use routes::create_router;
pub use server::{RpcServer, RpcServerConfig, RpcServerError, RpcServerHandle};
