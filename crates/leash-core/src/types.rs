//! Core domain types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the distinguished administrative account
pub const ROOT_USER: &str = "root";

/// Keys that can never be written through the key-value operations
pub const RESERVED_KEYS: &[&str] = &["name", "password"];

/// Whether `key` is reserved
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A registered account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// Stored `scheme:digest` hash; may be empty for an account with no password
    #[serde(default)]
    pub password: String,
    /// Arbitrary data stored by the user
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, SessionValue>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password_hash.into(),
            data: BTreeMap::new(),
        }
    }
}

/// A typed value attached to a session or user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SessionValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Blob(Vec<u8>),
}

impl TryFrom<serde_json::Value> for SessionValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::String(s) => Ok(SessionValue::Text(s)),
            Value::Bool(b) => Ok(SessionValue::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(SessionValue::Integer(i)),
                None => n
                    .as_f64()
                    .map(SessionValue::Float)
                    .ok_or_else(|| format!("unrepresentable number {}", n)),
            },
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| "arrays must contain bytes (0-255)".to_string())
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(SessionValue::Blob),
            Value::Null => Err("null is not a storable value".to_string()),
            Value::Object(_) => Err("objects are not storable values".to_string()),
        }
    }
}

impl From<SessionValue> for serde_json::Value {
    fn from(value: SessionValue) -> Self {
        match value {
            SessionValue::Text(s) => serde_json::Value::String(s),
            SessionValue::Integer(i) => serde_json::Value::from(i),
            SessionValue::Float(f) => serde_json::Value::from(f),
            SessionValue::Bool(b) => serde_json::Value::Bool(b),
            SessionValue::Blob(bytes) => serde_json::Value::from(bytes),
        }
    }
}

/// Persisted form of a live session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub username: String,
    /// Creation time, Unix millis
    pub created_at: u64,
    /// Last successful lookup, Unix millis
    pub last_access: u64,
    #[serde(default)]
    pub client_info: String,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, SessionValue>,
}

/// Result of one Execution Engine call; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    #[serde(rename = "cwd")]
    pub working_directory: String,
}

/// Everything the persistence collaborator loads and saves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    /// Deployment settings captured by first-run configuration
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}
