//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::optional_duration_secs;
use crate::password::HashScheme;

/// Configuration for the Leash server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the RPC server to
    pub bind_address: String,

    /// Initial working directory of new sessions
    pub home: PathBuf,

    /// Path to the users/sessions state document
    pub state_file: PathBuf,

    /// Execution strategy, resolved once at startup
    pub strategy: String,

    /// Shell used for `-c` invocations
    pub shell: String,

    /// Profile sourced before every command; `None` skips the bootstrap
    pub shell_profile: Option<String>,

    /// Bound on a single execution (0 disables)
    #[serde(with = "optional_duration_secs")]
    pub exec_timeout: Option<Duration>,

    /// Idle time after which a session expires (0 disables)
    #[serde(with = "optional_duration_secs")]
    pub idle_timeout: Option<Duration>,

    /// Scheme used when a password is set
    pub password_scheme: HashScheme,

    /// Remote interpreter endpoint
    pub remote: RemoteConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: "127.0.0.1:8086".to_string(),
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            state_file: config_dir.join("state.json"),
            strategy: "native-exec".to_string(),
            shell: "/bin/bash".to_string(),
            shell_profile: Some(".bashrc".to_string()),
            exec_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(12 * 60 * 60)),
            password_scheme: HashScheme::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Home directory as a string, the default session working directory
    pub fn home_dir(&self) -> String {
        self.home.to_string_lossy().into_owned()
    }
}

/// Where the remote interpreter lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://localhost/leash/`
    pub root: Option<String>,

    /// Endpoint suffix: `cgi-bin/cmd.<language>`
    pub language: String,

    /// Client user agent sent with each request
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root: None,
            language: "py".to_string(),
            user_agent: concat!("leash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl RemoteConfig {
    /// Full endpoint URL for a given session token
    ///
    /// Returns `None` when no root is configured.
    pub fn endpoint(&self, token: &str) -> Option<String> {
        let root = self.root.as_deref()?;
        let separator = if root.ends_with('/') { "" } else { "/" };
        Some(format!(
            "{}{}cgi-bin/cmd.{}?token={}",
            root, separator, self.language, token
        ))
    }
}
