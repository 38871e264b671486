//! Method dispatch
//!
//! Maps an [`RpcRequest`] onto the matching [`ServerState`] operation.
//! Parameters are positional; the token always comes first for calls that
//! need one.

use serde::Serialize;
use serde_json::{Map, Value};

use leash_core::rpc::{RpcError, RpcRequest, RpcResponse};
use leash_core::{LeashError, SessionValue};

use crate::state::ServerState;

/// Run one request to completion
pub async fn dispatch(state: &ServerState, request: RpcRequest, client_info: &str) -> RpcResponse {
    let RpcRequest { id, method, params } = request;
    tracing::debug!("RPC {} ({} params)", method, params.len());

    match call(state, &method, Params::new(&method, &params), client_info).await {
        Ok(result) => RpcResponse::ok(id, result),
        Err(e) => {
            tracing::debug!("RPC {} failed: {}", method, e);
            RpcResponse::err(id, RpcError::from(&e))
        }
    }
}

async fn call(
    state: &ServerState,
    method: &str,
    params: Params<'_>,
    client_info: &str,
) -> Result<Value, LeashError> {
    match method {
        "login" => to_json(state.login(params.str(0)?, params.str(1)?, client_info)?),
        "valid_token" => to_json(state.valid_token(params.opt_str(0)?.unwrap_or_default())),
        "logout" => to_json(state.logout(params.str(0)?)?),
        "purge" => to_json(state.purge(params.str(0)?)?),
        "installed" => to_json(state.installed()),
        "configure" => to_json(state.configure(params.object(0)?).await?),
        "get_settings" => to_json(state.get_settings(params.str(0)?).await?),
        "executables" => to_json(state.executables(params.str(0)?).await?),
        "get_config" => to_json(state.get_config(params.str(0)?)?),
        "add_user" => to_json(
            state
                .add_user(params.str(0)?, params.str(1)?, params.str(2)?)
                .await?,
        ),
        "remove_user" => to_json(state.remove_user(params.str(0)?, params.str(1)?).await?),
        "list_users" => to_json(state.list_users(params.str(0)?)?),
        "change_password" => to_json(state.change_password(params.str(0)?, params.str(1)?).await?),
        "session_set" => to_json(state.session_set(
            params.str(0)?,
            params.str(1)?,
            params.session_value(2)?,
        )?),
        "session_get" => to_json(
            state
                .session_get(params.str(0)?, params.str(1)?)?
                .map(Value::from),
        ),
        "store_user_data" => to_json(
            state
                .store_user_data(params.str(0)?, params.str(1)?, params.session_value(2)?)
                .await?,
        ),
        "user_sessions" => to_json(state.user_sessions(params.str(0)?)?),
        "list_shells" => to_json(state.list_shells(params.opt_str(0)?)?),
        "test_shell" => to_json(state.test_shell(params.str(0)?, params.str(1)?).await?),
        "shell" => to_json(state.shell(params.str(0)?, params.str(1)?).await?),
        other => Err(LeashError::InvalidRequest(format!(
            "There is no '{}' method",
            other
        ))),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, LeashError> {
    serde_json::to_value(value)
        .map_err(|e| LeashError::InvalidRequest(format!("unserializable result: {}", e)))
}

/// Positional parameter accessor
struct Params<'a> {
    method: &'a str,
    values: &'a [Value],
}

impl<'a> Params<'a> {
    fn new(method: &'a str, values: &'a [Value]) -> Self {
        Self { method, values }
    }

    fn invalid(&self, index: usize, expected: &str) -> LeashError {
        LeashError::InvalidRequest(format!(
            "{}: parameter {} must be {}",
            self.method,
            index + 1,
            expected
        ))
    }

    fn str(&self, index: usize) -> Result<&'a str, LeashError> {
        self.opt_str(index)?
            .ok_or_else(|| self.invalid(index, "a string"))
    }

    /// A string, or `None` when missing or null
    fn opt_str(&self, index: usize) -> Result<Option<&'a str>, LeashError> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(index, "a string")),
        }
    }

    fn object(&self, index: usize) -> Result<Map<String, Value>, LeashError> {
        match self.values.get(index) {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Err(self.invalid(index, "an object")),
        }
    }

    fn session_value(&self, index: usize) -> Result<SessionValue, LeashError> {
        let value = self
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| self.invalid(index, "present"))?;
        SessionValue::try_from(value).map_err(|reason| {
            LeashError::InvalidRequest(format!("{}: {}", self.method, reason))
        })
    }
}
