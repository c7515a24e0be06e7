//! The `ds` capability bridge injected into every plugin.
//!
//! This table is the only way a plugin can reach the host. Every function in
//! it contains its own failures: errors are logged and the script receives
//! `nil`, so a bad call never aborts the render pass that made it.

use crate::abi::{self, AbiError, ParamType};
use mlua::{DeserializeOptions, Lua, LuaSerdeExt, Table, Value, Variadic};
use rhizome_plinth_core::{ContextId, DispatchError, HostCallbacks};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("argument is not plain data: {0}")]
    Conversion(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Host collaborators bound to one context.
#[derive(Clone)]
pub struct Capabilities {
    context: ContextId,
    plugin: Arc<str>,
    host: Arc<dyn HostCallbacks>,
}

impl Capabilities {
    pub fn new(context: ContextId, plugin: &str, host: Arc<dyn HostCallbacks>) -> Self {
        Self {
            context,
            plugin: Arc::from(plugin),
            host,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    fn failed(&self, operation: &str, err: &CapabilityError) {
        warn!(
            context_id = %self.context,
            plugin = %self.plugin,
            operation,
            "capability call failed: {}",
            err
        );
    }

    /// Build the `ds` table.
    pub fn into_table(self, lua: &Lua) -> mlua::Result<Table> {
        let ds = lua.create_table()?;

        let caps = self.clone();
        let dispatch = lua.create_async_function(move |lua, args: Variadic<Value>| {
            let caps = caps.clone();
            let actions = json_args(&lua, args);
            async move {
                let outcome = match actions {
                    Ok(actions) => {
                        let count = actions.len();
                        caps.host
                            .dispatch(caps.context, actions)
                            .await
                            .map(|()| count)
                            .map_err(CapabilityError::from)
                    }
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(count) => debug!(
                        context_id = %caps.context,
                        plugin = %caps.plugin,
                        "dispatched {} action(s)",
                        count
                    ),
                    Err(err) => caps.failed("dispatch", &err),
                }
                Ok(Value::Nil)
            }
        })?;
        ds.set("dispatch", dispatch)?;

        let caps = self.clone();
        let log = lua.create_function(move |lua, args: Variadic<Value>| {
            match json_args(lua, args) {
                Ok(args) => caps.host.log(caps.context, args),
                Err(err) => caps.failed("log", &err),
            }
            Ok(Value::Nil)
        })?;
        ds.set("log", log)?;

        let caps = self.clone();
        let quest = lua.create_function(move |lua, args: Variadic<Value>| {
            match json_args(lua, args) {
                Ok(args) => caps.host.quest(caps.context, args),
                Err(err) => caps.failed("sendQuestMessage", &err),
            }
            Ok(Value::Nil)
        })?;
        ds.set("sendQuestMessage", quest)?;

        let caps = self.clone();
        let encode_call = lua.create_function(move |lua, (signature, args): (Value, Value)| {
            let result = string_arg(&signature, "signature").and_then(|signature| {
                let args = list_arg(lua, args)?;
                Ok(abi::encode_call(&signature, &args)?)
            });
            Ok(caps.hex_or_nil(lua, "encodeCall", result))
        })?;
        ds.set("encodeCall", encode_call)?;

        let caps = self.clone();
        let abi_encode = lua.create_function(move |lua, (types, values): (Value, Value)| {
            let result = typed_values(lua, types, values)
                .and_then(|(types, values)| Ok(abi::encode(&types, &values)?));
            Ok(caps.hex_or_nil(lua, "abiEncode", result))
        })?;
        ds.set("abiEncode", abi_encode)?;

        let caps = self.clone();
        let encode_packed = lua.create_function(move |lua, (types, values): (Value, Value)| {
            let result = typed_values(lua, types, values)
                .and_then(|(types, values)| Ok(abi::encode_packed(&types, &values)?));
            Ok(caps.hex_or_nil(lua, "encodePacked", result))
        })?;
        ds.set("encodePacked", encode_packed)?;

        let caps = self.clone();
        let keccak = lua.create_function(move |lua, data: Value| {
            let result = match &data {
                Value::String(s) => {
                    let bytes = s.as_bytes().to_vec();
                    let decoded = bytes
                        .strip_prefix(b"0x")
                        .and_then(|digits| std::str::from_utf8(digits).ok())
                        .and_then(|digits| abi::parse_hex(digits).ok());
                    Ok(abi::keccak256(&decoded.unwrap_or(bytes)).to_vec())
                }
                other => Err(CapabilityError::InvalidArgument(format!(
                    "keccak256 expects a string, got {}",
                    other.type_name()
                ))),
            };
            Ok(caps.hex_or_nil(lua, "keccak256", result))
        })?;
        ds.set("keccak256", keccak)?;

        let caps = self;
        let selector = lua.create_function(move |lua, signature: Value| {
            let result = string_arg(&signature, "signature").and_then(|signature| {
                Ok(abi::FunctionSignature::parse(&signature)?.selector().to_vec())
            });
            Ok(caps.hex_or_nil(lua, "selector", result))
        })?;
        ds.set("selector", selector)?;

        Ok(ds)
    }

    fn hex_or_nil(
        &self,
        lua: &Lua,
        operation: &str,
        result: Result<Vec<u8>, CapabilityError>,
    ) -> Value {
        match result {
            Ok(bytes) => lua
                .create_string(abi::to_hex(&bytes))
                .map(Value::String)
                .unwrap_or(Value::Nil),
            Err(err) => {
                self.failed(operation, &err);
                Value::Nil
            }
        }
    }
}

fn deserialize_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unsupported_types(false)
}

/// Convert a Lua value to JSON, skipping functions and other non-data values.
pub fn json_value(lua: &Lua, value: Value) -> Result<serde_json::Value, CapabilityError> {
    lua.from_value_with(value, deserialize_options())
        .map_err(|e| CapabilityError::Conversion(e.to_string()))
}

fn json_args(lua: &Lua, args: Variadic<Value>) -> Result<Vec<serde_json::Value>, CapabilityError> {
    args.into_iter().map(|arg| json_value(lua, arg)).collect()
}

fn string_arg(value: &Value, name: &str) -> Result<String, CapabilityError> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        other => Err(CapabilityError::InvalidArgument(format!(
            "{name} must be a string, got {}",
            other.type_name()
        ))),
    }
}

fn list_arg(lua: &Lua, value: Value) -> Result<Vec<serde_json::Value>, CapabilityError> {
    if value.is_nil() {
        return Ok(Vec::new());
    }
    match json_value(lua, value)? {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        other => Err(CapabilityError::InvalidArgument(format!(
            "expected a list, got {other}"
        ))),
    }
}

fn typed_values(
    lua: &Lua,
    types: Value,
    values: Value,
) -> Result<(Vec<ParamType>, Vec<serde_json::Value>), CapabilityError> {
    let types = list_arg(lua, types)?
        .iter()
        .map(|ty| match ty.as_str() {
            Some(name) => Ok(ParamType::parse(name)?),
            None => Err(CapabilityError::InvalidArgument(format!(
                "type names must be strings, got {ty}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let values = list_arg(lua, values)?;
    Ok((types, values))
}
