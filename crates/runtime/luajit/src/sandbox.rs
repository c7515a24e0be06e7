//! Lua VM construction with a restricted global environment.
//!
//! Each plugin gets its own VM with only `table`, `string` and `math` opened,
//! and its chunk runs against an environment table built from an explicit
//! allow-list. This limits ambient authority; it is not a security boundary.

use mlua::{Lua, LuaOptions, StdLib, Table, Value, Variadic};

/// Base functions copied into every plugin environment.
const BASE_ALLOWLIST: &[&str] = &[
    "assert",
    "error",
    "getmetatable",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "rawget",
    "rawset",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
    "unpack",
    "xpcall",
];

const LIBRARIES: &[&str] = &["math", "string", "table"];

/// Create a VM with only the safe standard libraries opened.
pub fn create_vm() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )
}

/// Build the environment table a plugin chunk runs in.
///
/// `print` is rebound to structured logging under the plugin's id.
pub fn environment(lua: &Lua, plugin: &str) -> mlua::Result<Table> {
    let globals = lua.globals();
    let env = lua.create_table()?;

    for name in BASE_ALLOWLIST.iter().chain(LIBRARIES) {
        let value: Value = globals.raw_get(*name)?;
        if !value.is_nil() {
            env.raw_set(*name, value)?;
        }
    }

    let plugin = plugin.to_string();
    let print = lua.create_function(move |_, args: Variadic<Value>| {
        let line = args.iter().map(display).collect::<Vec<_>>().join("\t");
        tracing::debug!(plugin = %plugin, "{}", line);
        Ok(())
    })?;
    env.raw_set("print", print)?;
    env.raw_set("_G", env.clone())?;

    Ok(env)
}

/// Render a Lua value for log output without invoking metamethods.
pub fn display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_excludes_ambient_authority() {
        let lua = create_vm().unwrap();
        let env = environment(&lua, "test").unwrap();
        for name in ["io", "os", "require", "package", "dofile", "loadfile", "load", "loadstring", "debug"] {
            let value: Value = env.raw_get(name).unwrap();
            assert!(value.is_nil(), "{name} should not be reachable");
        }
        for name in ["pairs", "string", "math", "table", "print"] {
            let value: Value = env.raw_get(name).unwrap();
            assert!(!value.is_nil(), "{name} should be reachable");
        }
    }

    #[test]
    fn test_display_values() {
        let lua = create_vm().unwrap();
        assert_eq!(display(&Value::Nil), "nil");
        assert_eq!(display(&Value::Integer(3)), "3");
        let s = lua.create_string("hi").unwrap();
        assert_eq!(display(&Value::String(s)), "hi");
        let t = lua.create_table().unwrap();
        assert_eq!(display(&Value::Table(t)), "table");
    }
}
