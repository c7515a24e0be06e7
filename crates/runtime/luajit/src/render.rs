//! Turning a plugin's returned table into a plain-data render tree.
//!
//! Walks `components -> content -> {submit, buttons[*].action}`, replaces every
//! function it finds with a [`CallbackRef`] string and keeps the function in a
//! fresh reference table. Whatever else the script returned is deserialized
//! with non-data values skipped, so no function survives into the output.

use mlua::{DeserializeOptions, Function, Lua, LuaSerdeExt, Table, Value};
use rhizome_plinth_core::{CallbackRef, RenderResponse};
use std::collections::HashMap;
use thiserror::Error;

/// Callbacks captured during one render pass, keyed by reference string.
pub type RefTable = HashMap<String, Function>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("update must return a table or nil, got {0}")]
    NotATable(&'static str),

    #[error("malformed render tree: {0}")]
    Malformed(#[from] mlua::Error),
}

/// Output of a successful render pass.
#[derive(Debug)]
pub struct Rendered {
    pub response: RenderResponse,
    pub refs: RefTable,
}

impl Rendered {
    pub fn empty() -> Self {
        Self {
            response: RenderResponse::empty(),
            refs: RefTable::new(),
        }
    }
}

/// Mint references for every callback and deserialize the tree.
pub fn collect(lua: &Lua, value: Value) -> Result<Rendered, RenderError> {
    let tree = match value {
        Value::Nil => return Ok(Rendered::empty()),
        Value::Table(tree) => tree,
        other => return Err(RenderError::NotATable(other.type_name())),
    };

    let mut refs = RefTable::new();
    mint_references(&tree, &mut refs)?;

    let response: RenderResponse = lua.from_value_with(
        Value::Table(tree),
        DeserializeOptions::new().deny_unsupported_types(false),
    )?;
    Ok(Rendered { response, refs })
}

fn mint_references(tree: &Table, refs: &mut RefTable) -> mlua::Result<()> {
    let Some(components) = tree.get::<Option<Table>>("components")? else {
        return Ok(());
    };

    for (index, component) in components.sequence_values::<Table>().enumerate() {
        let component = component?;
        let component_id = normalize_id(&component, index)?;

        let Some(content) = component.get::<Option<Table>>("content")? else {
            continue;
        };
        for (index, block) in content.sequence_values::<Table>().enumerate() {
            let block = block?;
            let content_id = normalize_id(&block, index)?;

            if let Value::Function(callback) = block.get::<Value>("submit")? {
                let reference = CallbackRef::submit(&component_id, &content_id);
                bind(&block, "submit", reference, callback, refs)?;
            }

            let Some(buttons) = block.get::<Option<Table>>("buttons")? else {
                continue;
            };
            for (index, button) in buttons.sequence_values::<Table>().enumerate() {
                let button = button?;
                if let Value::Function(callback) = button.get::<Value>("action")? {
                    let reference = CallbackRef::button(&component_id, &content_id, index);
                    bind(&button, "action", reference, callback, refs)?;
                }
            }
        }
    }
    Ok(())
}

/// Swap `node[key]` for its reference. Repeated ids get a `~n` suffix so
/// every callback stays reachable.
fn bind(
    node: &Table,
    key: &str,
    reference: CallbackRef,
    callback: Function,
    refs: &mut RefTable,
) -> mlua::Result<()> {
    let mut reference = reference.into_string();
    if refs.contains_key(&reference) {
        let base = reference;
        reference = (1..)
            .map(|n| format!("{base}~{n}"))
            .find(|candidate| !refs.contains_key(candidate))
            .unwrap_or_default();
        tracing::warn!(reference = %base, renamed = %reference, "duplicate callback reference");
    }
    node.set(key, reference.as_str())?;
    refs.insert(reference, callback);
    Ok(())
}

/// Read a node's `id` as a string, falling back to its list position.
fn normalize_id(node: &Table, index: usize) -> mlua::Result<String> {
    let id = match node.get::<Value>("id")? {
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        _ => index.to_string(),
    };
    node.set("id", id.as_str())?;
    Ok(id)
}
