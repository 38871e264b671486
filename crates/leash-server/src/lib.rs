//! leash-server: authenticated command execution for a browser terminal
//!
//! Users log in over RPC and receive a session token. Each shell call runs
//! in a fresh process through a configurable execution strategy; the
//! session's working directory is carried between calls with a marker
//! protocol.

pub mod auth;
pub mod exec;
pub mod rpc;
pub mod service;
pub mod session;
pub mod state;

pub use state::ServerState;
