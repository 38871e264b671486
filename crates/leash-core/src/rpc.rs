//! RPC protocol between the browser terminal and the server
//!
//! JSON-RPC style envelopes over HTTP POST. Every method is called by name
//! with positional parameters; the token is the first parameter of every
//! authenticated method. A response carries either `result` or an `error`
//! object of the form `{kind, message}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, LeashError};

/// RPC call from the browser client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Client-chosen correlation id, echoed back
    #[serde(default)]
    pub id: Value,
    /// Method name, e.g. `login` or `shell`
    pub method: String,
    /// Positional parameters
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// RPC reply to the browser client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Structured error carried in an RPC reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    /// Raw output of a failed execution, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Exit status of a failed execution, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<&LeashError> for RpcError {
    fn from(err: &LeashError) -> Self {
        let (output, exit_code) = match err {
            LeashError::ExecutionError {
                output, exit_code, ..
            } => (output.clone(), *exit_code),
            _ => (None, None),
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            output,
            exit_code,
        }
    }
}

/// Session information returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub token: String,
    pub username: String,
    pub created_at: u64,
    pub last_access: u64,
    pub client_info: String,
    pub working_directory: String,
}

/// Deployment view returned by `get_config` (root only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub settings: serde_json::Map<String, Value>,
    pub users: Vec<String>,
    pub strategy: String,
    pub session_count: usize,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req: RpcRequest = serde_json::from_str(r#"{"method":"installed"}"#).unwrap();
        assert_eq!(req.method, "installed");
        assert!(req.params.is_empty());
        assert_eq!(req.id, Value::Null);
    }

    #[test]
    fn test_error_response_shape() {
        let err = LeashError::AccessDenied("Invalid Token".into());
        let resp = RpcResponse::err(json!(3), RpcError::from(&err));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], json!(3));
        assert_eq!(json["result"], Value::Null);
        assert_eq!(json["error"]["kind"], json!("AccessDenied"));
        assert_eq!(json["error"]["message"], json!("Access Denied: Invalid Token"));
        assert!(json["error"].get("output").is_none());
    }

    #[test]
    fn test_execution_error_carries_output() {
        let err = LeashError::ExecutionError {
            message: "marker missing".into(),
            output: Some("bash: oops".into()),
            exit_code: Some(127),
        };
        let rpc = RpcError::from(&err);
        assert_eq!(rpc.kind, ErrorKind::ExecutionError);
        assert_eq!(rpc.output.as_deref(), Some("bash: oops"));
        assert_eq!(rpc.exit_code, Some(127));
    }
}
