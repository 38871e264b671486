//! Credential/session persistence trait

use crate::error::PersistenceError;
use crate::types::Snapshot;

/// Storage collaborator for users, sessions and settings
///
/// Consulted once at startup (`load`) and on clean shutdown (`save`), plus a
/// `save` after each mutation of the user list. The in-memory state stays
/// authoritative for the life of the process even when a `save` fails.
pub trait Persistence: Send + Sync {
    /// Load the last saved snapshot; a store that was never written yields
    /// an empty snapshot
    fn load(&self) -> Result<Snapshot, PersistenceError>;

    /// Replace the stored snapshot
    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;
}
