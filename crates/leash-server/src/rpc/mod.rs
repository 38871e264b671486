//! RPC facade
//!
//! JSON-RPC style calls over HTTP for the browser terminal.

mod dispatch;
mod server;

pub use dispatch::dispatch;
pub use server::{router, RpcServer};
