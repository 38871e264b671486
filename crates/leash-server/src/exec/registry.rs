//! Strategy registry
//!
//! Maps configuration names to strategy instances. The names used by older
//! deployments (`exec`, `shell_exec`, `cgi_python`) resolve to their
//! current equivalents.

use std::collections::BTreeMap;
use std::sync::Arc;

use leash_core::config::RemoteConfig;
use leash_core::traits::ExecutionStrategy;
use leash_core::LeashError;

use super::{native, pipe, remote, NativeExec, RemoteInterpreter, ShellPipe};

const ALIASES: &[(&str, &str)] = &[
    ("exec", native::NAME),
    ("shell_exec", pipe::NAME),
    ("cgi_python", remote::NAME),
];

/// Registered strategies, keyed by name
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn ExecutionStrategy>>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the three built-in strategies
    pub fn with_defaults(remote: RemoteConfig) -> Result<Self, LeashError> {
        let mut registry = Self::new();
        registry.register(Arc::new(NativeExec::new()));
        registry.register(Arc::new(ShellPipe::new()));
        registry.register(Arc::new(RemoteInterpreter::new(remote)?));
        Ok(registry)
    }

    /// Add or replace a strategy under its own name
    pub fn register(&mut self, strategy: Arc<dyn ExecutionStrategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    /// Canonical name for `name`, following aliases
    pub fn canonical_name<'a>(&self, name: &'a str) -> &'a str {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, target)| *target)
            .unwrap_or(name)
    }

    /// Look up a strategy by name or alias
    pub fn get(&self, name: &str) -> Result<Arc<dyn ExecutionStrategy>, LeashError> {
        self.strategies
            .get(self.canonical_name(name))
            .cloned()
            .ok_or_else(|| LeashError::UnknownStrategy(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.keys().copied().collect()
    }
}
