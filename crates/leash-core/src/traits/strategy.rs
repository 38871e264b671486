//! Execution strategy trait

use async_trait::async_trait;

use crate::error::LeashError;

/// A composed shell script ready to be handed to a strategy
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Token of the session on whose behalf the script runs
    pub token: String,
    /// Shell binary used for `-c`
    pub shell: String,
    /// Script body (bootstrap, `cd`, user command, marker, `pwd`)
    pub script: String,
}

impl Invocation {
    pub fn new(token: impl Into<String>, shell: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            shell: shell.into(),
            script: script.into(),
        }
    }

    /// Single command line `<shell> -c '<script>' 2>&1`
    ///
    /// Fails only if the script contains a NUL byte.
    pub fn command_line(&self) -> Result<String, LeashError> {
        let script = shlex::try_quote(&self.script)
            .map_err(|e| LeashError::InvalidRequest(format!("cannot quote command: {}", e)))?;
        Ok(format!("{} -c {} 2>&1", self.shell, script))
    }
}

/// Combined stdout+stderr of one strategy run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub output: String,
    /// Exit status, when the strategy observed one
    pub exit_code: Option<i32>,
}

impl RawOutput {
    pub fn new(output: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }
}

/// One pluggable backend able to run a shell script and capture its output
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Registry name, e.g. `native-exec`
    fn name(&self) -> &'static str;

    /// Run the invocation and return its combined output
    async fn run(&self, invocation: &Invocation) -> Result<RawOutput, LeashError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_script() {
        let inv = Invocation::new("t", "/bin/bash", "echo 'hi there'; pwd");
        let line = inv.command_line().unwrap();
        assert!(line.starts_with("/bin/bash -c "));
        assert!(line.ends_with(" 2>&1"));
        let inner = &line["/bin/bash -c ".len()..line.len() - " 2>&1".len()];
        let words = shlex::split(inner).unwrap();
        assert_eq!(words, vec!["echo 'hi there'; pwd".to_string()]);
    }

    #[test]
    fn test_command_line_rejects_nul() {
        let inv = Invocation::new("t", "/bin/sh", "echo \0");
        assert!(inv.command_line().is_err());
    }
}
