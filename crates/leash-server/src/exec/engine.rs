//! Execution engine
//!
//! Runs a command in a session's working directory through the configured
//! strategy and recovers the output and the new directory from a single
//! invocation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use leash_core::config::ServerConfig;
use leash_core::token::{generate_marker, token_prefix};
use leash_core::traits::{ExecutionStrategy, Invocation, RawOutput};
use leash_core::{ExecutionResult, LeashError};

use super::protocol::{compose_script, split_output};
use super::StrategyRegistry;
use crate::session::{SessionHandle, SessionStore};

/// Command used by health checks
const HEALTH_COMMAND: &str = "echo -n x";
/// Output a healthy strategy prints for [`HEALTH_COMMAND`]
const HEALTH_EXPECTED: &str = "x";

/// Engine settings taken from the server configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Strategy name or alias
    pub strategy: String,
    pub shell: String,
    /// Absolute path of the profile to source, if any
    pub profile: Option<String>,
    pub timeout: Option<Duration>,
}

impl EngineOptions {
    /// Derive options from config; a relative profile is resolved against
    /// the home directory
    pub fn from_config(config: &ServerConfig) -> Self {
        let profile = config.shell_profile.as_ref().map(|p| {
            if Path::new(p).is_absolute() {
                p.clone()
            } else {
                config.home.join(p).to_string_lossy().into_owned()
            }
        });
        Self {
            strategy: config.strategy.clone(),
            shell: config.shell.clone(),
            profile,
            timeout: config.exec_timeout,
        }
    }
}

pub struct ExecutionEngine {
    registry: StrategyRegistry,
    /// Strategy resolved at construction; `None` if the name is unknown
    active: Option<Arc<dyn ExecutionStrategy>>,
    options: EngineOptions,
    sessions: Arc<SessionStore>,
}

impl ExecutionEngine {
    pub fn new(registry: StrategyRegistry, options: EngineOptions, sessions: Arc<SessionStore>) -> Self {
        let active = match registry.get(&options.strategy) {
            Ok(strategy) => {
                tracing::info!("Execution strategy: {}", strategy.name());
                Some(strategy)
            }
            Err(e) => {
                tracing::warn!("{}; shell commands will fail", e);
                None
            }
        };
        Self {
            registry,
            active,
            options,
            sessions,
        }
    }

    /// Name of the configured strategy, as written in the configuration
    pub fn strategy_name(&self) -> &str {
        &self.options.strategy
    }

    fn active(&self) -> Result<Arc<dyn ExecutionStrategy>, LeashError> {
        self.active
            .clone()
            .ok_or_else(|| LeashError::UnknownStrategy(self.options.strategy.clone()))
    }

    /// Run `command` in the session's working directory and store the
    /// directory it ends in
    ///
    /// Calls on the same session run one at a time.
    pub async fn execute(
        &self,
        session: &SessionHandle,
        command: &str,
    ) -> Result<ExecutionResult, LeashError> {
        let strategy = self.active()?;

        let _guard = session.lock_execution().await;
        let cwd = session.working_directory();
        if cwd.is_empty() {
            return Err(LeashError::InvalidSessionState(
                "session has no working directory".into(),
            ));
        }

        tracing::debug!(
            "Executing for {} ({}…) in {}",
            session.username,
            token_prefix(&session.token),
            cwd
        );
        let mut result = self
            .run_marked(strategy.as_ref(), &session.token, &cwd, command)
            .await?;

        if result.working_directory.is_empty() {
            result.working_directory = cwd;
        } else if !self
            .sessions
            .update_working_directory(&session.token, &result.working_directory)
        {
            tracing::debug!(
                "Session {}… ended during execution",
                token_prefix(&session.token)
            );
        }
        Ok(result)
    }

    /// Run `command` in `dir` without touching any session state
    pub async fn run_at(
        &self,
        token: &str,
        dir: &str,
        command: &str,
    ) -> Result<ExecutionResult, LeashError> {
        let strategy = self.active()?;
        self.run_marked(strategy.as_ref(), token, dir, command).await
    }

    async fn run_marked(
        &self,
        strategy: &dyn ExecutionStrategy,
        token: &str,
        cwd: &str,
        command: &str,
    ) -> Result<ExecutionResult, LeashError> {
        let marker = generate_marker();
        let script = compose_script(self.options.profile.as_deref(), cwd, command, &marker)?;
        let invocation = Invocation::new(token, self.options.shell.clone(), script);

        let raw = self.invoke(strategy, &invocation).await?;
        let (output, working_directory) =
            split_output(&raw.output, &marker).ok_or_else(|| LeashError::ExecutionError {
                message: "output carries no working directory report".into(),
                output: Some(raw.output.clone()),
                exit_code: raw.exit_code,
            })?;

        Ok(ExecutionResult {
            output,
            working_directory,
        })
    }

    async fn invoke(
        &self,
        strategy: &dyn ExecutionStrategy,
        invocation: &Invocation,
    ) -> Result<RawOutput, LeashError> {
        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, strategy.run(invocation))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        "{} timed out after {:?} ({}…)",
                        strategy.name(),
                        limit,
                        token_prefix(&invocation.token)
                    );
                    LeashError::ExecutionTimeout(limit.as_secs())
                })?,
            None => strategy.run(invocation).await,
        }
    }

    /// Health check: run a trivial command through `name`
    ///
    /// Any failure counts as unhealthy; only an unregistered name is an error.
    pub async fn test_strategy(&self, name: &str, token: &str) -> Result<bool, LeashError> {
        let strategy = self.registry.get(name)?;
        let invocation = Invocation::new(token, self.options.shell.clone(), HEALTH_COMMAND);

        match self.invoke(strategy.as_ref(), &invocation).await {
            Ok(raw) => Ok(raw.output == HEALTH_EXPECTED),
            Err(e) => {
                tracing::debug!("Strategy {} failed its health check: {}", strategy.name(), e);
                Ok(false)
            }
        }
    }

    /// Names of every registered strategy
    pub fn list_strategies(&self) -> Vec<&'static str> {
        self.registry.names()
    }
}
