//! JSON-RPC envelopes, parameter shapes, and error mapping.

use rhizome_plinth_core::{ContextId, PluginDescriptor, RuntimeError, Submission};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Application error code used for every failure.
pub const ERROR_CODE: i64 = -32000;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("plugin '{0}' is not in the manifest")]
    UnknownPlugin(String),

    #[error("failed to encode result: {0}")]
    Encode(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RpcError {
    /// Value of `error.data.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Parse(_) => "parse_error",
            RpcError::UnknownMethod(_) => "unknown_method",
            RpcError::InvalidParams(_) => "invalid_params",
            RpcError::UnknownPlugin(_) => "unknown_plugin",
            RpcError::Encode(_) => "internal",
            RpcError::Runtime(err) => err.kind(),
        }
    }
}

/// Decode `params` into a typed shape.
pub fn params<T: for<'de> Deserialize<'de>>(params: Option<&Value>) -> Result<T, RpcError> {
    let params = params.cloned().unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct SetStateParams {
    pub state: Value,
    #[serde(default)]
    pub block: u64,
}

/// Either a full descriptor or the id of a plugin preloaded from the manifest.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NewContextParams {
    Inline(PluginDescriptor),
    Registered { plugin: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    pub context_id: ContextId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    pub context_id: ContextId,
    #[serde(flatten)]
    pub submission: Submission,
}

pub fn response(id: Option<&Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id
    })
}

pub fn error_response(id: Option<&Value>, err: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": ERROR_CODE,
            "message": err.to_string(),
            "data": { "kind": err.kind() }
        },
        "id": id
    })
}

/// Server-initiated message carrying a context's collaborator call.
pub fn notification(method: &str, context: ContextId, args: Vec<Value>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": { "contextId": context, "args": args }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_params_accept_both_shapes() {
        let inline: NewContextParams =
            params(Some(&json!({ "id": "smelter", "source": "function update() end", "trust": "trusted" })))
                .unwrap();
        assert!(matches!(inline, NewContextParams::Inline(ref d) if d.id == "smelter"));

        let registered: NewContextParams = params(Some(&json!({ "plugin": "smelter" }))).unwrap();
        assert!(matches!(registered, NewContextParams::Registered { ref plugin } if plugin == "smelter"));

        let err = params::<NewContextParams>(Some(&json!({ "source": 3 }))).unwrap_err();
        assert_eq!(err.kind(), "invalid_params");
    }

    #[test]
    fn test_submit_params_flatten_submission() {
        let submit: SubmitParams = params(Some(&json!({
            "contextId": 2,
            "ref": "c/b/submit",
            "values": { "amount": "3" }
        })))
        .unwrap();
        assert_eq!(submit.context_id, ContextId::new(2));
        assert_eq!(submit.submission.reference, "c/b/submit");
        assert_eq!(submit.submission.values, json!({ "amount": "3" }));
    }

    #[test]
    fn test_error_response_carries_kind() {
        let err = RpcError::from(RuntimeError::UnknownContext(ContextId::new(7)));
        let body = error_response(Some(&json!(1)), &err);
        assert_eq!(body["error"]["code"], json!(ERROR_CODE));
        assert_eq!(body["error"]["data"]["kind"], json!("unknown_context"));
        assert_eq!(body["id"], json!(1));
    }

    #[test]
    fn test_notification_shape() {
        let body = notification("dispatch", ContextId::new(3), vec![json!({ "name": "CRAFT" })]);
        assert_eq!(body["method"], json!("dispatch"));
        assert_eq!(body["params"]["contextId"], json!(3));
        assert_eq!(body["params"]["args"], json!([{ "name": "CRAFT" }]));
        assert!(body.get("id").is_none());
    }
}
