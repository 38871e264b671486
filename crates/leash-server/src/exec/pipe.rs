//! `shell-pipe` strategy
//!
//! Hands the full command line to `/bin/sh -c` and returns its stdout
//! untouched. The command line itself redirects stderr.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use leash_core::traits::{ExecutionStrategy, Invocation, RawOutput};
use leash_core::LeashError;

use super::process::output_in_group;

pub const NAME: &str = "shell-pipe";

const SYSTEM_SHELL: &str = "/bin/sh";

#[derive(Debug, Default, Clone, Copy)]
pub struct ShellPipe;

impl ShellPipe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionStrategy for ShellPipe {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, invocation: &Invocation) -> Result<RawOutput, LeashError> {
        let command_line = invocation.command_line()?;

        let mut command = Command::new(SYSTEM_SHELL);
        command
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = output_in_group(&mut command)
            .await
            .map_err(|e| LeashError::execution(format!("failed to spawn {}: {}", SYSTEM_SHELL, e)))?;

        if !output.stderr.is_empty() {
            tracing::debug!(
                "{}: {}",
                SYSTEM_SHELL,
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::trace!("{} produced {} bytes", NAME, stdout.len());
        Ok(RawOutput::new(stdout, output.status.code()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let inv = Invocation::new("t", "/bin/sh", "echo -n x");
        let out = ShellPipe::new().run(&inv).await.unwrap();
        assert_eq!(out.output, "x");
    }

    #[tokio::test]
    async fn test_raw_output_kept() {
        let inv = Invocation::new("t", "/bin/sh", "printf 'a  \\n\\n'; echo err >&2");
        let out = ShellPipe::new().run(&inv).await.unwrap();
        assert_eq!(out.output, "a  \n\nerr\n");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_quotes_survive() {
        let inv = Invocation::new("t", "/bin/sh", "echo \"it's\" '$HOME'");
        let out = ShellPipe::new().run(&inv).await.unwrap();
        assert_eq!(out.output, "it's $HOME\n");
    }
}
