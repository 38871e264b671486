//! Server state
//!
//! One [`ServerState`] is built at startup and shared by every request
//! handler. It owns the user registry, session store, access guard and
//! execution engine, plus the persistence collaborator used to save them.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::Mutex;

use leash_core::config::ServerConfig;
use leash_core::error::PersistenceError;
use leash_core::traits::Persistence;
use leash_core::{LeashError, Snapshot};

use crate::auth::{AccessGuard, UserRegistry};
use crate::exec::{EngineOptions, ExecutionEngine, StrategyRegistry};
use crate::session::SessionStore;

/// Global state for the server
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Registered users
    pub users: Arc<UserRegistry>,
    /// Live sessions
    pub sessions: Arc<SessionStore>,
    /// Token and role checks
    pub guard: AccessGuard,
    /// Command execution
    pub engine: ExecutionEngine,
    /// Deployment settings written by `configure`
    settings: RwLock<BTreeMap<String, Value>>,
    persistence: Arc<dyn Persistence>,
    /// Held from snapshot until the save completes
    flush_lock: Arc<Mutex<()>>,
}

impl ServerState {
    /// Load the persisted snapshot and build state from it
    ///
    /// A load failure is returned as-is; the caller decides whether it is
    /// fatal.
    pub fn load(config: ServerConfig, persistence: Arc<dyn Persistence>) -> Result<Self, LeashError> {
        let snapshot = persistence.load()?;
        let registry = StrategyRegistry::with_defaults(config.remote.clone())?;
        Ok(Self::from_snapshot(config, snapshot, persistence, registry))
    }

    /// Build state from an already loaded snapshot
    pub fn from_snapshot(
        config: ServerConfig,
        snapshot: Snapshot,
        persistence: Arc<dyn Persistence>,
        registry: StrategyRegistry,
    ) -> Self {
        let users = Arc::new(UserRegistry::from_users(snapshot.users));
        let sessions = Arc::new(SessionStore::new(config.home_dir(), config.idle_timeout));
        sessions.restore(snapshot.sessions);
        if let Some(ttl) = config.idle_timeout {
            let expired = sessions.expire_idle(ttl);
            if !expired.is_empty() {
                tracing::info!("Dropped {} sessions that expired while stopped", expired.len());
            }
        }

        tracing::info!(
            "Loaded {} users and {} sessions",
            users.len(),
            sessions.len()
        );

        let guard = AccessGuard::new(Arc::clone(&users), Arc::clone(&sessions));
        let engine = ExecutionEngine::new(
            registry,
            EngineOptions::from_config(&config),
            Arc::clone(&sessions),
        );

        Self {
            config,
            users,
            sessions,
            guard,
            engine,
            settings: RwLock::new(snapshot.settings),
            persistence,
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Copy of the deployment settings
    pub fn settings(&self) -> BTreeMap<String, Value> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the deployment settings
    pub fn replace_settings(&self, settings: BTreeMap<String, Value>) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Everything that survives a restart
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            users: self.users.users(),
            sessions: self.sessions.records(),
            settings: self.settings(),
        }
    }

    /// Save the current snapshot
    ///
    /// Saves run one at a time, each writing a snapshot taken after the
    /// previous one finished, on the blocking pool. In-memory state is
    /// authoritative; a failed save is reported but nothing is rolled back.
    pub async fn flush(&self) -> Result<(), LeashError> {
        self.save().await.map_err(|e| {
            tracing::warn!("Failed to persist state: {}", e);
            LeashError::PersistenceFailure(e)
        })
    }

    async fn save(&self) -> Result<(), PersistenceError> {
        let guard = Arc::clone(&self.flush_lock).lock_owned().await;
        let snapshot = self.snapshot();
        let persistence = Arc::clone(&self.persistence);

        // The guard moves along so a cancelled caller can't let the next
        // save overtake this one
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            persistence.save(&snapshot)
        })
        .await
        .map_err(|e| PersistenceError::Interrupted(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leash_core::config::RemoteConfig;
    use leash_core::persist::{JsonFileStore, MemoryStore};
    use leash_core::{SessionRecord, User};
    use std::time::Duration;

    struct FailingStore;

    impl Persistence for FailingStore {
        fn load(&self) -> Result<Snapshot, PersistenceError> {
            Ok(Snapshot::default())
        }

        fn save(&self, _snapshot: &Snapshot) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io {
                path: "/readonly/state.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    fn record(token: &str, last_access: u64) -> SessionRecord {
        SessionRecord {
            token: token.into(),
            username: "bob".into(),
            created_at: last_access,
            last_access,
            client_info: String::new(),
            working_directory: "/tmp".into(),
            extra: Default::default(),
        }
    }

    fn registry() -> StrategyRegistry {
        StrategyRegistry::with_defaults(RemoteConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let store = Arc::new(MemoryStore::new());
        let mut snapshot = Snapshot::default();
        snapshot.users.push(User::new("root", "sha256:00"));
        snapshot.settings.insert("theme".into(), Value::from("dark"));
        snapshot.sessions.push(record("t1", leash_core::time::current_time_millis()));

        let state = ServerState::from_snapshot(
            ServerConfig::default(),
            snapshot.clone(),
            store.clone(),
            registry(),
        );
        state.flush().await.unwrap();
        assert_eq!(store.current(), snapshot);
    }

    #[test]
    fn test_expired_sessions_dropped_on_load() {
        let mut snapshot = Snapshot::default();
        snapshot.sessions.push(record("old", 1));
        snapshot
            .sessions
            .push(record("new", leash_core::time::current_time_millis()));

        let config = ServerConfig {
            idle_timeout: Some(Duration::from_secs(60)),
            ..ServerConfig::default()
        };
        let state = ServerState::from_snapshot(
            config,
            snapshot,
            Arc::new(MemoryStore::new()),
            registry(),
        );
        assert!(state.sessions.peek("old").is_none());
        assert!(state.sessions.peek("new").is_some());
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_memory() {
        let state = ServerState::from_snapshot(
            ServerConfig::default(),
            Snapshot::default(),
            Arc::new(FailingStore),
            registry(),
        );
        state.users.add("alice", "sha256:aa".into()).unwrap();
        let err = state.flush().await.unwrap_err();
        assert_eq!(err.kind(), leash_core::ErrorKind::PersistenceFailure);
        assert!(state.users.contains("alice"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_keep_last_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = Arc::new(ServerState::from_snapshot(
            ServerConfig::default(),
            Snapshot::default(),
            Arc::new(JsonFileStore::new(&path)),
            registry(),
        ));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    state
                        .users
                        .add(&format!("user{}", i), "sha256:aa".into())
                        .unwrap();
                    state.flush().await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // The last save ran after every add, so the file has all of them
        let saved = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(saved.users.len(), 16);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
