//! Authentication for the server
//!
//! Users log in with a password and receive a session token; everything
//! else is authorized by that token.

mod guard;
mod users;

pub use guard::AccessGuard;
pub use users::UserRegistry;
