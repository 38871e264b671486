//! Core trait definitions

mod persistence;
mod strategy;

pub use persistence::Persistence;
pub use strategy::{ExecutionStrategy, Invocation, RawOutput};
