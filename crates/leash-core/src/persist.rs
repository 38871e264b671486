//! Persistence implementations
//!
//! [`JsonFileStore`] keeps the snapshot as a single JSON document with mode
//! 0600 on Unix since it holds password hashes and live tokens.
//! [`MemoryStore`] keeps it in memory, for tests and ephemeral deployments.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::error::PersistenceError;
use crate::traits::Persistence;
use crate::types::Snapshot;

/// Snapshot stored as a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Persistence for JsonFileStore {
    fn load(&self) -> Result<Snapshot, PersistenceError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Snapshot::default()),
            Ok(contents) => {
                let mut snapshot: Snapshot = serde_json::from_str(&contents)?;
                // Records without an owner or token are unusable
                snapshot
                    .sessions
                    .retain(|s| !s.token.is_empty() && !s.username.is_empty());
                Ok(snapshot)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No state file at {:?}, starting empty", self.path);
                Ok(Snapshot::default())
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_string_pretty(snapshot)?;

        // Each save gets its own sibling file, renamed into place once
        // complete, so concurrent saves never share a partial document
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.io_error(e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| self.io_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| self.io_error(e))?;
        }

        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        tracing::debug!(
            "Saved state: {} users, {} sessions",
            snapshot.users.len(),
            snapshot.sessions.len()
        );
        Ok(())
    }
}

/// Snapshot held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the last saved snapshot
    pub fn current(&self) -> Snapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Persistence for MemoryStore {
    fn load(&self) -> Result<Snapshot, PersistenceError> {
        Ok(self.current())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        Ok(())
    }
}
