//! `remote-interpreter` strategy
//!
//! POSTs the command line to a CGI endpoint on another host and reads back
//! a JSON envelope: `{"result": "..."}` on success, `{"error": ...}` on
//! failure.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use leash_core::config::RemoteConfig;
use leash_core::error::ConfigError;
use leash_core::traits::{ExecutionStrategy, Invocation, RawOutput};
use leash_core::LeashError;

pub const NAME: &str = "remote-interpreter";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    result: Option<String>,
}

/// Delegates execution to `<root>/cgi-bin/cmd.<lang>?token=<token>`
#[derive(Debug, Clone)]
pub struct RemoteInterpreter {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteInterpreter {
    pub fn new(config: RemoteConfig) -> Result<Self, LeashError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ExecutionStrategy for RemoteInterpreter {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, invocation: &Invocation) -> Result<RawOutput, LeashError> {
        let url = self
            .config
            .endpoint(&invocation.token)
            .ok_or_else(|| LeashError::execution("remote interpreter root is not configured"))?;
        let body = invocation.command_line()?;

        tracing::debug!("POST {} ({} bytes)", self.config.language, body.len());

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| LeashError::execution(format!("remote interpreter unreachable: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LeashError::execution(format!("failed to read response: {}", e)))?;

        let envelope: Envelope = serde_json::from_str(&text).map_err(|_| LeashError::ExecutionError {
            message: format!("remote interpreter returned a non-JSON reply ({})", status),
            output: Some(text.clone()),
            exit_code: None,
        })?;

        if let Some(error) = envelope.error {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(LeashError::execution(message));
        }

        match envelope.result {
            Some(result) => Ok(RawOutput::new(result, None)),
            None => Err(LeashError::ExecutionError {
                message: "remote interpreter reply has neither result nor error".into(),
                output: Some(text),
                exit_code: None,
            }),
        }
    }
}
