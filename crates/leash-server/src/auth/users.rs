//! User registry
//!
//! Usernames are unique. The list keeps registration order, which is the
//! order `list_users` reports.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use leash_core::password::is_well_formed;
use leash_core::types::is_reserved_key;
use leash_core::{LeashError, SessionValue, User, ROOT_USER};

/// In-memory credential store
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: RwLock<Vec<User>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted users; later duplicates are dropped
    pub fn from_users(users: Vec<User>) -> Self {
        let mut unique: Vec<User> = Vec::with_capacity(users.len());
        for user in users {
            if unique.iter().any(|u| u.username == user.username) {
                tracing::warn!("Ignoring duplicate user record '{}'", user.username);
                continue;
            }
            unique.push(user);
        }
        Self {
            users: RwLock::new(unique),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<User>> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<User>> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.read().iter().find(|u| u.username == username).cloned()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.read().iter().any(|u| u.username == username)
    }

    /// Register a user with an already hashed password
    pub fn add(&self, username: &str, password_hash: String) -> Result<(), LeashError> {
        if username.is_empty() {
            return Err(LeashError::InvalidRequest("username must not be empty".into()));
        }
        let mut users = self.write();
        if users.iter().any(|u| u.username == username) {
            return Err(LeashError::UserExists(username.to_string()));
        }
        users.push(User::new(username, password_hash));
        Ok(())
    }

    /// First-run setup in one step: create root, or give an unusable root
    /// record a password, and optionally register one more user
    ///
    /// Fails with `AlreadyInstalled` if root already has a usable hash. The
    /// check and the inserts happen under one write lock, so of two racing
    /// setups exactly one succeeds.
    pub fn install_root(
        &self,
        root_hash: String,
        extra: Option<(String, String)>,
    ) -> Result<(), LeashError> {
        let mut users = self.write();
        if users
            .iter()
            .any(|u| u.username == ROOT_USER && is_well_formed(&u.password))
        {
            return Err(LeashError::AlreadyInstalled);
        }
        if let Some((name, _)) = &extra {
            if name.is_empty() {
                return Err(LeashError::InvalidRequest("username must not be empty".into()));
            }
            if name == ROOT_USER || users.iter().any(|u| &u.username == name) {
                return Err(LeashError::UserExists(name.clone()));
            }
        }

        match users.iter_mut().find(|u| u.username == ROOT_USER) {
            // Left over from an aborted setup
            Some(root) => root.password = root_hash,
            None => users.push(User::new(ROOT_USER, root_hash)),
        }
        if let Some((name, hash)) = extra {
            users.push(User::new(name, hash));
        }
        Ok(())
    }

    /// Remove a user, returning the removed record
    pub fn remove(&self, username: &str) -> Result<User, LeashError> {
        let mut users = self.write();
        let index = users
            .iter()
            .position(|u| u.username == username)
            .ok_or_else(|| LeashError::UnknownUser(username.to_string()))?;
        Ok(users.remove(index))
    }

    pub fn set_password(&self, username: &str, password_hash: String) -> Result<(), LeashError> {
        let mut users = self.write();
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| LeashError::UnknownUser(username.to_string()))?;
        user.password = password_hash;
        Ok(())
    }

    /// Store a value on the user record; reserved keys are refused
    pub fn set_data(&self, username: &str, key: &str, value: SessionValue) -> Result<(), LeashError> {
        if is_reserved_key(key) {
            return Err(LeashError::ReservedKey(key.to_string()));
        }
        let mut users = self.write();
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| LeashError::UnknownUser(username.to_string()))?;
        user.data.insert(key.to_string(), value);
        Ok(())
    }

    /// Usernames in registration order
    pub fn usernames(&self) -> Vec<String> {
        self.read().iter().map(|u| u.username.clone()).collect()
    }

    /// Copy of every record, for persistence
    pub fn users(&self) -> Vec<User> {
        self.read().clone()
    }

    /// The system is initialized once a root user with a usable hash exists
    pub fn installed(&self) -> bool {
        self.read()
            .iter()
            .any(|u| u.username == ROOT_USER && is_well_formed(&u.password))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_duplicate() {
        let users = UserRegistry::new();
        users.add("alice", "sha256:aa".into()).unwrap();
        assert!(matches!(
            users.add("alice", "sha256:bb".into()),
            Err(LeashError::UserExists(_))
        ));
        assert_eq!(users.get("alice").unwrap().password, "sha256:aa");
        assert!(users.add("", "x:y".into()).is_err());
    }

    #[test]
    fn test_remove() {
        let users = UserRegistry::new();
        users.add("alice", "sha256:aa".into()).unwrap();
        users.add("bob", "sha256:bb".into()).unwrap();
        assert_eq!(users.remove("alice").unwrap().username, "alice");
        assert!(matches!(users.remove("alice"), Err(LeashError::UnknownUser(_))));
        assert_eq!(users.usernames(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_installed() {
        let users = UserRegistry::new();
        assert!(!users.installed());
        users.add("alice", "sha256:aa".into()).unwrap();
        assert!(!users.installed());
        users.add(ROOT_USER, "garbage".into()).unwrap();
        assert!(!users.installed());
        users.set_password(ROOT_USER, "sha256:ff".into()).unwrap();
        assert!(users.installed());
    }

    #[test]
    fn test_install_root() {
        let users = UserRegistry::new();
        users
            .install_root("sha256:aa".into(), Some(("bob".into(), "sha256:bb".into())))
            .unwrap();
        assert!(users.installed());
        assert_eq!(users.usernames(), vec![ROOT_USER, "bob"]);

        let err = users.install_root("sha256:cc".into(), None).unwrap_err();
        assert!(matches!(err, LeashError::AlreadyInstalled));
        assert_eq!(users.get(ROOT_USER).unwrap().password, "sha256:aa");
    }

    #[test]
    fn test_install_root_repairs_unusable_record() {
        let users = UserRegistry::from_users(vec![User::new(ROOT_USER, "")]);
        assert!(matches!(
            users.install_root("sha256:aa".into(), Some((ROOT_USER.into(), "x:y".into()))),
            Err(LeashError::UserExists(_))
        ));
        assert!(!users.installed());

        users.install_root("sha256:aa".into(), None).unwrap();
        assert_eq!(users.len(), 1);
        assert!(users.installed());
    }

    #[test]
    fn test_racing_installs_have_one_winner() {
        for _ in 0..50 {
            let users = std::sync::Arc::new(UserRegistry::new());
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));
            let handles: Vec<_> = ["sha256:01", "sha256:02"]
                .into_iter()
                .map(|hash| {
                    let users = std::sync::Arc::clone(&users);
                    let barrier = std::sync::Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        users.install_root(hash.to_string(), None).map(|_| hash)
                    })
                })
                .collect();

            let winners: Vec<&str> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap().ok())
                .collect();
            assert_eq!(winners.len(), 1);
            assert_eq!(users.get(ROOT_USER).unwrap().password, winners[0]);
        }
    }

    #[test]
    fn test_set_data() {
        let users = UserRegistry::new();
        users.add("alice", "sha256:aa".into()).unwrap();
        users
            .set_data("alice", "editor", SessionValue::Text("vi".into()))
            .unwrap();
        assert!(matches!(
            users.set_data("alice", "name", SessionValue::Text("x".into())),
            Err(LeashError::ReservedKey(_))
        ));
        assert!(matches!(
            users.set_data("zed", "editor", SessionValue::Bool(true)),
            Err(LeashError::UnknownUser(_))
        ));
        assert_eq!(users.get("alice").unwrap().data.len(), 1);
    }

    #[test]
    fn test_from_users_drops_duplicates() {
        let users = UserRegistry::from_users(vec![
            User::new("a", "sha256:1"),
            User::new("a", "sha256:2"),
            User::new("b", "sha256:3"),
        ]);
        assert_eq!(users.len(), 2);
        assert_eq!(users.get("a").unwrap().password, "sha256:1");
    }
}
