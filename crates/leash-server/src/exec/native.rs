//! `native-exec` strategy
//!
//! Spawns the shell directly and captures stdout line by line, the way a
//! process-exec primitive reports output: trailing whitespace is dropped
//! from each line and lines are joined with `\n`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use leash_core::traits::{ExecutionStrategy, Invocation, RawOutput};
use leash_core::LeashError;

use super::process::output_in_group;

pub const NAME: &str = "native-exec";

/// Runs `<shell> -c <script>` as a child process
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeExec;

impl NativeExec {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionStrategy for NativeExec {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, invocation: &Invocation) -> Result<RawOutput, LeashError> {
        // Fold stderr into stdout inside the shell so both arrive in order
        let script = format!("exec 2>&1\n{}", invocation.script);

        let mut command = Command::new(&invocation.shell);
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let output = output_in_group(&mut command)
            .await
            .map_err(|e| {
                LeashError::execution(format!("failed to spawn {}: {}", invocation.shell, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let joined = stdout
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");

        tracing::trace!("{} produced {} bytes", NAME, joined.len());
        Ok(RawOutput::new(joined, output.status.code()))
    }
}
