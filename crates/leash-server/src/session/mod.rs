//! Session management

mod cleanup;
mod store;

pub use cleanup::{run_idle_cleanup, CLEANUP_INTERVAL};
pub use store::{SessionHandle, SessionStore};
