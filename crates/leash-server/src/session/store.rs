//! Session store implementation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};

use leash_core::rpc::SessionInfo;
use leash_core::time::{current_time_millis, elapsed_duration};
use leash_core::token::{generate_token, token_prefix};
use leash_core::types::is_reserved_key;
use leash_core::{LeashError, SessionRecord, SessionValue};

/// Single authority for session lifecycle
///
/// Sessions are indexed by token in a sharded concurrent map; token lookups
/// from unrelated requests never contend on one global lock.
pub struct SessionStore {
    /// Sessions indexed by token
    sessions: DashMap<String, Arc<SessionHandle>>,
    /// Working directory given to new sessions
    home: String,
    /// Idle expiry, if enabled
    idle_timeout: Option<Duration>,
    /// Creation order, breaks timestamp ties
    next_seq: AtomicU64,
}

/// A live session
#[derive(Debug)]
pub struct SessionHandle {
    pub token: String,
    pub username: String,
    /// Creation time, Unix millis
    pub created_at: u64,
    /// User agent of the client that logged in
    pub client_info: String,
    seq: u64,
    last_access: AtomicU64,
    working_directory: RwLock<String>,
    extra: RwLock<BTreeMap<String, SessionValue>>,
    /// Held for compose -> invoke -> persist of one execution
    exec_lock: Mutex<()>,
}

impl SessionHandle {
    fn new(seq: u64, record: SessionRecord) -> Self {
        Self {
            token: record.token,
            username: record.username,
            created_at: record.created_at,
            client_info: record.client_info,
            seq,
            last_access: AtomicU64::new(record.last_access),
            working_directory: RwLock::new(record.working_directory),
            extra: RwLock::new(record.extra),
            exec_lock: Mutex::new(()),
        }
    }

    /// Last successful lookup, Unix millis
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.last_access
            .fetch_max(current_time_millis(), Ordering::AcqRel);
    }

    /// Whether the session has been idle longer than `ttl`
    pub fn is_idle(&self, ttl: Duration) -> bool {
        elapsed_duration(self.last_access()) > ttl
    }

    pub fn working_directory(&self) -> String {
        self.working_directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_working_directory(&self, path: impl Into<String>) {
        *self
            .working_directory
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    /// Serialize executions on this session
    ///
    /// The guard must be held across reading the working directory, running
    /// the command and storing the new directory.
    pub async fn lock_execution(&self) -> MutexGuard<'_, ()> {
        self.exec_lock.lock().await
    }

    pub fn get_value(&self, key: &str) -> Option<SessionValue> {
        self.extra
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Attach a value; reserved keys are refused
    pub fn set_value(&self, key: &str, value: SessionValue) -> Result<(), LeashError> {
        if is_reserved_key(key) {
            return Err(LeashError::ReservedKey(key.to_string()));
        }
        self.extra
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            token: self.token.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
            last_access: self.last_access(),
            client_info: self.client_info.clone(),
            working_directory: self.working_directory(),
            extra: self
                .extra
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn to_info(&self) -> SessionInfo {
        SessionInfo {
            token: self.token.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
            last_access: self.last_access(),
            client_info: self.client_info.clone(),
            working_directory: self.working_directory(),
        }
    }
}

impl SessionStore {
    /// Create an empty store
    pub fn new(home: impl Into<String>, idle_timeout: Option<Duration>) -> Self {
        Self {
            sessions: DashMap::new(),
            home: home.into(),
            idle_timeout,
            next_seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a session for `username` with a fresh, unique token
    pub fn create(&self, username: &str, client_info: &str) -> Arc<SessionHandle> {
        let now = current_time_millis();
        loop {
            let token = generate_token();
            match self.sessions.entry(token.clone()) {
                Entry::Occupied(_) => {
                    tracing::warn!("Token collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    let record = SessionRecord {
                        token,
                        username: username.to_string(),
                        created_at: now,
                        last_access: now,
                        client_info: client_info.to_string(),
                        working_directory: self.home.clone(),
                        extra: BTreeMap::new(),
                    };
                    let handle = Arc::new(SessionHandle::new(self.next_seq(), record));
                    slot.insert(Arc::clone(&handle));
                    tracing::info!(
                        "Created session {}… for {}",
                        token_prefix(&handle.token),
                        username
                    );
                    return handle;
                }
            }
        }
    }

    /// Look up a live session and stamp its last access
    ///
    /// An expired session is removed here and reported as absent.
    pub fn find(&self, token: &str) -> Option<Arc<SessionHandle>> {
        if token.is_empty() {
            return None;
        }
        let handle = self.sessions.get(token).map(|r| Arc::clone(&r))?;

        if let Some(ttl) = self.idle_timeout {
            if handle.is_idle(ttl) {
                if self
                    .sessions
                    .remove_if(token, |_, s| s.is_idle(ttl))
                    .is_some()
                {
                    tracing::info!("Session {}… expired", token_prefix(token));
                }
                return None;
            }
        }

        handle.touch();
        Some(handle)
    }

    /// Look up a session without touching it
    pub fn peek(&self, token: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(token).map(|r| Arc::clone(&r))
    }

    /// Remove a session; returns whether one was removed
    pub fn delete(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token).is_some();
        if removed {
            tracing::info!("Deleted session {}…", token_prefix(token));
        }
        removed
    }

    /// All live sessions of `username`, oldest first
    pub fn list_by_user(&self, username: &str) -> Vec<Arc<SessionHandle>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|r| r.username == username)
            .map(|r| Arc::clone(&r))
            .collect();
        sessions.sort_by_key(|s| (s.created_at, s.seq));
        sessions
    }

    /// Remove every session of `username`
    pub fn remove_by_user(&self, username: &str) -> Vec<Arc<SessionHandle>> {
        let tokens: Vec<String> = self
            .sessions
            .iter()
            .filter(|r| r.username == username)
            .map(|r| r.key().clone())
            .collect();

        let removed: Vec<_> = tokens
            .iter()
            .filter_map(|t| self.sessions.remove(t).map(|(_, s)| s))
            .collect();

        if !removed.is_empty() {
            tracing::info!("Removed {} sessions of {}", removed.len(), username);
        }
        removed
    }

    /// Store a new working directory; returns false if the session is gone
    pub fn update_working_directory(&self, token: &str, path: &str) -> bool {
        match self.peek(token) {
            Some(session) => {
                session.set_working_directory(path);
                true
            }
            None => false,
        }
    }

    /// Remove sessions idle longer than `ttl`
    pub fn expire_idle(&self, ttl: Duration) -> Vec<Arc<SessionHandle>> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|r| r.is_idle(ttl))
            .map(|r| r.key().clone())
            .collect();

        expired
            .iter()
            .filter_map(|t| self.sessions.remove_if(t, |_, s| s.is_idle(ttl)))
            .map(|(_, s)| s)
            .collect()
    }

    /// Replace contents with persisted records
    pub fn restore(&self, records: Vec<SessionRecord>) {
        self.sessions.clear();
        let mut records = records;
        records.sort_by_key(|r| r.created_at);
        for record in records {
            let handle = Arc::new(SessionHandle::new(self.next_seq(), record));
            self.sessions.insert(handle.token.clone(), handle);
        }
    }

    /// Persistable copy of every live session, oldest first
    pub fn records(&self) -> Vec<SessionRecord> {
        let mut sessions = self.list();
        sessions.sort_by_key(|s| (s.created_at, s.seq));
        sessions.iter().map(|s| s.to_record()).collect()
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Idle timeout in effect
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
