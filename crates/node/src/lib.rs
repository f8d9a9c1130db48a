//! Production replica with async I/O.
//!
//! This crate wraps the synchronous consensus engine with real I/O:
//!
//! - RocksDB persistence for blocks and spent anonymous tokens
//! - An axum HTTP surface: the peer consensus endpoint, the client vote
//!   endpoint and the chain read endpoints
//! - A reqwest-based peer transport with one bounded queue per peer
//! - Tokio timers for proposal batching
//!
//! # Architecture
//!
//! A single task owns the state machine and receives events via an mpsc
//! channel; this serializes all protocol logic without a shared lock:
//!
//! ```text
//! HTTP handlers ──┐
//! Timers ─────────┼──> event channel ──> Runner { PbftState::handle } ──> Actions
//! Runner feedback ┘                          │
//!                  broadcasts / storage / timers / commit hooks
//! ```
//!
//! Broadcast I/O is dispatched to per-peer sender tasks after the handler
//! returns, so protocol logic never blocks on the network.

pub mod config;
pub mod metrics;
pub mod network;
pub mod rpc;

mod node;
mod runner;
mod storage;
mod timers;

pub use config::{Cli, NodeConfig};
pub use node::{start_node, NodeHandle};
pub use runner::{Runner, ShutdownHandle};
pub use storage::{Storage, StorageError};
pub use timers::TimerManager;
