//! leash-core: Core abstractions and configuration for Leash
//!
//! This crate provides the shared types, error taxonomy, token and password
//! primitives, RPC wire types and configuration structures used by the
//! server and its tests.

pub mod config;
pub mod error;
pub mod password;
pub mod persist;
pub mod rpc;
pub mod time;
pub mod token;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, LeashError};
pub use types::{ExecutionResult, SessionRecord, SessionValue, Snapshot, User, ROOT_USER};
