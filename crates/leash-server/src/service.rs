//! Operations exposed to clients
//!
//! Each method is one RPC call. Token checks go through the access guard
//! before anything is read or changed, and changes to users or settings are
//! flushed to persistence right away.

use serde_json::{Map, Value};

use leash_core::rpc::{ConfigView, SessionInfo};
use leash_core::{ExecutionResult, LeashError, SessionValue, ROOT_USER};

use crate::state::ServerState;

/// Lists shell builtins, functions, aliases and commands
const EXECUTABLES_COMMAND: &str = "compgen -A function -abck | sort | uniq";

impl ServerState {
    /// Open a session for valid credentials
    pub fn login(&self, username: &str, password: &str, client_info: &str) -> Result<String, LeashError> {
        self.guard.authenticate(username, password, client_info)
    }

    pub fn valid_token(&self, token: &str) -> bool {
        self.guard.is_valid(token)
    }

    /// End the caller's session
    pub fn logout(&self, token: &str) -> Result<bool, LeashError> {
        self.guard.require_valid_token(token)?;
        Ok(self.sessions.delete(token))
    }

    /// End every session of the caller's user, the caller's included
    pub fn purge(&self, token: &str) -> Result<usize, LeashError> {
        let session = self.guard.require_valid_token(token)?;
        Ok(self.sessions.remove_by_user(&session.username).len())
    }

    /// Whether first-run configuration has happened
    pub fn installed(&self) -> bool {
        self.users.installed()
    }

    /// First-run setup: create root and optionally one regular user
    ///
    /// `root_password`, `username` and `password` are consumed; every other
    /// key becomes a deployment setting.
    pub async fn configure(&self, mut settings: Map<String, Value>) -> Result<(), LeashError> {
        if self.installed() {
            return Err(LeashError::AlreadyInstalled);
        }

        let root_password = take_string(&mut settings, "root_password")?
            .ok_or_else(|| LeashError::InvalidRequest("root_password is required".into()))?;
        let username = take_string(&mut settings, "username")?;
        let password = take_string(&mut settings, "password")?;

        let scheme = self.config.password_scheme;
        let user = match username {
            Some(name) if !name.is_empty() => {
                let password = password.ok_or_else(|| {
                    LeashError::InvalidRequest(format!("password for '{}' is required", name))
                })?;
                Some((name, scheme.hash(&password)))
            }
            _ => None,
        };
        let created = user.as_ref().map(|(name, _)| name.clone());

        self.users.install_root(scheme.hash(&root_password), user)?;
        if let Some(name) = created {
            tracing::info!("Created user {}", name);
        }
        self.replace_settings(settings.into_iter().collect());

        tracing::info!("Root account configured");
        self.flush().await
    }

    /// Deployment settings with the computed `home`, `path` and
    /// `executables` entries
    pub async fn get_settings(&self, token: &str) -> Result<Map<String, Value>, LeashError> {
        self.guard.require_valid_token(token)?;

        let mut settings: Map<String, Value> = self.settings().into_iter().collect();
        settings
            .entry("home")
            .or_insert_with(|| Value::String(self.config.home_dir()));

        let path = self.engine.run_at(token, "/", "echo -n $PATH").await?;
        settings.insert("path".into(), Value::String(path.output));

        let executables = self.executables(token).await?;
        settings.insert("executables".into(), Value::from(executables));
        Ok(settings)
    }

    /// Names the shell can complete as commands
    pub async fn executables(&self, token: &str) -> Result<Vec<String>, LeashError> {
        self.guard.require_valid_token(token)?;
        let result = self.engine.run_at(token, "/", EXECUTABLES_COMMAND).await?;
        Ok(result
            .output
            .trim()
            .lines()
            // Drops single-character builtins such as `.`, `:` and `[`
            .filter(|line| line.len() > 1)
            .map(str::to_string)
            .collect())
    }

    /// Deployment view for root
    pub fn get_config(&self, token: &str) -> Result<ConfigView, LeashError> {
        self.guard.require_root(token)?;
        Ok(ConfigView {
            settings: self.settings().into_iter().collect(),
            users: self.users.usernames(),
            strategy: self.engine.strategy_name().to_string(),
            session_count: self.sessions.len(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub async fn add_user(&self, token: &str, username: &str, password: &str) -> Result<(), LeashError> {
        self.guard.require_root(token)?;
        self.users
            .add(username, self.config.password_scheme.hash(password))?;
        tracing::info!("Added user {}", username);
        self.flush().await
    }

    /// Remove a user and every session they own
    pub async fn remove_user(&self, token: &str, username: &str) -> Result<(), LeashError> {
        self.guard.require_root(token)?;
        if username == ROOT_USER {
            return Err(LeashError::InvalidRequest("root can't be removed".into()));
        }
        self.users.remove(username)?;
        let sessions = self.sessions.remove_by_user(username);
        tracing::info!(
            "Removed user {} and {} sessions",
            username,
            sessions.len()
        );
        self.flush().await
    }

    /// Usernames in registration order
    pub fn list_users(&self, token: &str) -> Result<Vec<String>, LeashError> {
        self.guard.require_valid_token(token)?;
        Ok(self.users.usernames())
    }

    /// Set a new password for the caller
    pub async fn change_password(&self, token: &str, password: &str) -> Result<(), LeashError> {
        let session = self.guard.require_valid_token(token)?;
        self.users.set_password(
            &session.username,
            self.config.password_scheme.hash(password),
        )?;
        tracing::info!("Password changed for {}", session.username);
        self.flush().await
    }

    pub fn session_set(&self, token: &str, key: &str, value: SessionValue) -> Result<(), LeashError> {
        let session = self.guard.require_valid_token(token)?;
        session.set_value(key, value)
    }

    pub fn session_get(&self, token: &str, key: &str) -> Result<Option<SessionValue>, LeashError> {
        let session = self.guard.require_valid_token(token)?;
        Ok(session.get_value(key))
    }

    /// Attach a value to the caller's user record
    pub async fn store_user_data(&self, token: &str, key: &str, value: SessionValue) -> Result<(), LeashError> {
        let session = self.guard.require_valid_token(token)?;
        self.users.set_data(&session.username, key, value)?;
        self.flush().await
    }

    /// Live sessions of the caller's user, oldest first
    pub fn user_sessions(&self, token: &str) -> Result<Vec<SessionInfo>, LeashError> {
        let session = self.guard.require_valid_token(token)?;
        Ok(self
            .sessions
            .list_by_user(&session.username)
            .iter()
            .map(|s| s.to_info())
            .collect())
    }

    /// Before installation anyone may check strategies; afterwards a valid
    /// token is required
    fn require_token_once_installed(&self, token: Option<&str>) -> Result<(), LeashError> {
        if self.installed() {
            self.guard.require_valid_token(token.unwrap_or_default())?;
        }
        Ok(())
    }

    pub fn list_shells(&self, token: Option<&str>) -> Result<Vec<&'static str>, LeashError> {
        self.require_token_once_installed(token)?;
        Ok(self.engine.list_strategies())
    }

    pub async fn test_shell(&self, token: &str, name: &str) -> Result<bool, LeashError> {
        self.require_token_once_installed(Some(token))?;
        self.engine.test_strategy(name, token).await
    }

    /// Run a command in the caller's session
    pub async fn shell(&self, token: &str, command: &str) -> Result<ExecutionResult, LeashError> {
        let session = self.guard.require_valid_token(token)?;
        self.engine.execute(&session, command).await
    }
}

/// Remove `key` from `map`, requiring a string when present
fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<Option<String>, LeashError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(LeashError::InvalidRequest(format!("{} must be a string", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use leash_core::config::{RemoteConfig, ServerConfig};
    use leash_core::persist::MemoryStore;
    use leash_core::{ErrorKind, Snapshot};
    use serde_json::json;

    use crate::exec::StrategyRegistry;

    fn settings_map(pairs: &[(&str, Value)]) -> std::collections::BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn state() -> (ServerState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = ServerConfig {
            home: "/tmp".into(),
            shell: "/bin/sh".into(),
            shell_profile: None,
            idle_timeout: None,
            ..ServerConfig::default()
        };
        let state = ServerState::from_snapshot(
            config,
            Snapshot::default(),
            store.clone(),
            StrategyRegistry::with_defaults(RemoteConfig::default()).unwrap(),
        );
        (state, store)
    }

    async fn installed() -> (ServerState, Arc<MemoryStore>) {
        let (state, store) = state();
        let settings = json!({
            "root_password": "secret",
            "username": "bob",
            "password": "hunter2",
            "theme": "dark"
        });
        state
            .configure(settings.as_object().cloned().unwrap())
            .await
            .unwrap();
        (state, store)
    }

    #[tokio::test]
    async fn test_configure() {
        let (state, store) = installed().await;
        assert!(state.installed());
        assert_eq!(state.users.usernames(), vec!["root", "bob"]);
        assert_eq!(state.settings(), settings_map(&[("theme", json!("dark"))]));

        let saved = store.current();
        assert_eq!(saved.users.len(), 2);
        assert!(saved.users[0].password.starts_with("sha256:"));

        let again = state.configure(Map::new()).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::AlreadyInstalled);
    }

    #[tokio::test]
    async fn test_configure_requires_root_password() {
        let (state, _) = state();
        let err = state.configure(Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(!state.installed());
    }

    #[tokio::test]
    async fn test_add_user_root_only() {
        let (state, _) = installed().await;
        let bob = state.login("bob", "hunter2", "").unwrap();
        let root = state.login(ROOT_USER, "secret", "").unwrap();

        let err = state.add_user(&bob, "eve", "pw").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(!state.users.contains("eve"));

        state.add_user(&root, "eve", "pw").await.unwrap();
        assert!(state.login("eve", "pw", "").is_ok());

        let err = state.add_user(&root, "eve", "other").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserExists);
    }

    #[tokio::test]
    async fn test_remove_user_clears_sessions() {
        let (state, store) = installed().await;
        let root = state.login(ROOT_USER, "secret", "").unwrap();
        let tokens: Vec<String> = (0..3)
            .map(|_| state.login("bob", "hunter2", "").unwrap())
            .collect();

        state.remove_user(&root, "bob").await.unwrap();
        assert!(state.sessions.list_by_user("bob").is_empty());
        for token in &tokens {
            assert!(!state.valid_token(token));
        }
        assert!(state.valid_token(&root));
        assert_eq!(store.current().users.len(), 1);

        assert_eq!(
            state.remove_user(&root, "bob").await.unwrap_err().kind(),
            ErrorKind::UnknownUser
        );
        assert_eq!(
            state.remove_user(&root, ROOT_USER).await.unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );
    }

    #[tokio::test]
    async fn test_logout_and_purge() {
        let (state, _) = installed().await;
        let a = state.login("bob", "hunter2", "").unwrap();
        let b = state.login("bob", "hunter2", "").unwrap();
        let root = state.login(ROOT_USER, "secret", "").unwrap();

        assert!(state.logout(&a).unwrap());
        assert_eq!(state.logout(&a).unwrap_err().kind(), ErrorKind::AccessDenied);

        let c = state.login("bob", "hunter2", "").unwrap();
        assert_eq!(state.purge(&c).unwrap(), 2);
        assert!(!state.valid_token(&b));
        assert!(state.valid_token(&root));
    }

    #[tokio::test]
    async fn test_change_password() {
        let (state, _) = installed().await;
        let token = state.login("bob", "hunter2", "").unwrap();
        state.change_password(&token, "new-pass").await.unwrap();
        assert_eq!(
            state.login("bob", "hunter2", "").unwrap_err().kind(),
            ErrorKind::InvalidCredentials
        );
        assert!(state.login("bob", "new-pass", "").is_ok());
    }

    #[tokio::test]
    async fn test_session_and_user_data() {
        let (state, store) = installed().await;
        let token = state.login("bob", "hunter2", "").unwrap();

        state
            .session_set(&token, "db", SessionValue::Integer(3))
            .unwrap();
        assert_eq!(
            state.session_get(&token, "db").unwrap(),
            Some(SessionValue::Integer(3))
        );
        assert_eq!(state.session_get(&token, "nope").unwrap(), None);
        assert_eq!(
            state
                .session_set(&token, "password", SessionValue::Bool(true))
                .unwrap_err()
                .kind(),
            ErrorKind::ReservedKey
        );

        state
            .store_user_data(&token, "editor", SessionValue::Text("vi".into()))
            .await
            .unwrap();
        let saved = store.current();
        let bob = saved.users.iter().find(|u| u.username == "bob").unwrap();
        assert_eq!(bob.data.get("editor"), Some(&SessionValue::Text("vi".into())));
        assert_eq!(
            state
                .store_user_data(&token, "name", SessionValue::Text("x".into()))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::ReservedKey
        );
    }

    #[tokio::test]
    async fn test_user_sessions_and_config() {
        let (state, _) = installed().await;
        let first = state.login("bob", "hunter2", "first").unwrap();
        let second = state.login("bob", "hunter2", "second").unwrap();
        let root = state.login(ROOT_USER, "secret", "").unwrap();

        let sessions = state.user_sessions(&second).unwrap();
        let tokens: Vec<&str> = sessions.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, vec![first.as_str(), second.as_str()]);
        assert_eq!(sessions[0].client_info, "first");

        assert_eq!(state.get_config(&first).unwrap_err().kind(), ErrorKind::AccessDenied);
        let view = state.get_config(&root).unwrap();
        assert_eq!(view.users, vec!["root", "bob"]);
        assert_eq!(view.session_count, 3);
        assert_eq!(view.strategy, "native-exec");
    }

    #[tokio::test]
    async fn test_list_and_test_shells() {
        let (state, _) = state();
        // Open before installation
        assert_eq!(state.list_shells(None).unwrap().len(), 3);
        assert!(state.test_shell("", "shell-pipe").await.unwrap());

        let (state, _) = installed().await;
        assert_eq!(
            state.list_shells(None).unwrap_err().kind(),
            ErrorKind::AccessDenied
        );
        let token = state.login("bob", "hunter2", "").unwrap();
        assert!(state.list_shells(Some(&token)).is_ok());
        assert!(state.test_shell(&token, "exec").await.unwrap());
    }

    #[tokio::test]
    async fn test_shell_round_trip() {
        let (state, _) = installed().await;
        let token = state.login("bob", "hunter2", "").unwrap();
        let result = state.shell(&token, "pwd").await.unwrap();
        assert_eq!(result.working_directory, "/tmp");
        assert_eq!(result.output, "/tmp\n");

        let err = state.shell("bogus", "pwd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_configures_have_one_winner() {
        let (state, store) = state();
        let state = Arc::new(state);

        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|password| {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let settings = json!({"root_password": password, "owner": password});
                    state
                        .configure(settings.as_object().cloned().unwrap())
                        .await
                        .map(|_| password)
                })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(password) => winners.push(password),
                Err(e) => assert_eq!(e.kind(), ErrorKind::AlreadyInstalled),
            }
        }
        assert_eq!(winners.len(), 1);

        let winner = winners[0];
        assert!(state.login(ROOT_USER, winner, "").is_ok());
        assert_eq!(state.settings(), settings_map(&[("owner", json!(winner))]));
        assert_eq!(store.current().users.len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_root_hash_logs_in() {
        let store = Arc::new(MemoryStore::new());
        let mut snapshot = Snapshot::default();
        snapshot.users.push(leash_core::User::new(
            ROOT_USER,
            leash_core::password::HashScheme::Legacy.hash("secret"),
        ));
        let state = ServerState::from_snapshot(
            ServerConfig::default(),
            snapshot,
            store,
            StrategyRegistry::with_defaults(RemoteConfig::default()).unwrap(),
        );

        assert!(state.installed());
        let token = state.login(ROOT_USER, "secret", "").unwrap();
        assert!(state.valid_token(&token));

        // New passwords use the configured scheme
        state.change_password(&token, "fresh").await.unwrap();
        assert!(state.users.get(ROOT_USER).unwrap().password.starts_with("sha256:"));
    }
}
