//! Plugin module loading.
//!
//! Loading is three textual/compile steps: strip `require` directives, wrap
//! the source so the runtime can install `ds` after compilation, then compile
//! and evaluate the chunk in its own VM. Either a fully initialized
//! [`LoadedModule`] comes back or nothing does.

use crate::ExecutionError;
use crate::capability::Capabilities;
use crate::render::{self, Rendered};
use crate::sandbox;
use mlua::{Function, Lua, LuaSerdeExt, SerializeOptions, Table, Value};
use rhizome_plinth_core::{LoadError, PluginDescriptor, PluginKind, Snapshot, TrustLevel};

/// Global the wrapper defines so the runtime can install the capability table.
const INSTALL_HOOK: &str = "__plinth_install";

/// Prepended to the first line so author line numbers are preserved.
const PRELUDE: &str = "local ds; function __plinth_install(c) ds = c end ";

/// Blank out `require` directives and shebang lines.
///
/// Plugins may only use the injected capability table, so any attempt to pull
/// in another module is removed. This is a line filter, not a sandbox.
pub fn strip_imports(source: &str) -> String {
    source
        .lines()
        .enumerate()
        .map(|(index, line)| {
            if is_import(line) || (index == 0 && line.starts_with("#!")) {
                ""
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_import(line: &str) -> bool {
    let line = line.trim();
    let rest = match line.strip_prefix("local ") {
        Some(rest) => match rest.split_once('=') {
            Some((_, rhs)) => rhs.trim_start(),
            None => return false,
        },
        None => line,
    };
    rest.strip_prefix("require").is_some_and(|after| {
        after.is_empty()
            || after.starts_with(|c: char| c == '(' || c == '"' || c == '\'' || c.is_whitespace())
    })
}

/// Wrap stripped source with the capability slot and its setter.
pub fn wrap(source: &str) -> String {
    format!("{PRELUDE}{}", strip_imports(source))
}

/// A compiled plugin with a callable `update` entry point.
pub struct LoadedModule {
    plugin: String,
    kind: PluginKind,
    trust: TrustLevel,
    env: Table,
    entry: Function,
    lua: Lua,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("plugin", &self.plugin)
            .field("kind", &self.kind)
            .field("trust", &self.trust)
            .finish_non_exhaustive()
    }
}

/// Compile and evaluate a plugin.
pub fn load(descriptor: &PluginDescriptor) -> Result<LoadedModule, LoadError> {
    let plugin = descriptor.id.clone();
    let sandbox_err = |e: mlua::Error| LoadError::Sandbox {
        plugin: plugin.clone(),
        message: e.to_string(),
    };

    let lua = sandbox::create_vm().map_err(sandbox_err)?;
    let env = sandbox::environment(&lua, &plugin).map_err(sandbox_err)?;

    let chunk = lua
        .load(wrap(&descriptor.source))
        .set_name(format!("={plugin}"))
        .set_environment(env.clone());
    let function = chunk.into_function().map_err(|e| match e {
        mlua::Error::SyntaxError { message, .. } => LoadError::Syntax {
            plugin: plugin.clone(),
            message,
        },
        other => sandbox_err(other),
    })?;

    let returned: Value = function.call(()).map_err(|e| LoadError::Evaluation {
        plugin: plugin.clone(),
        message: e.to_string(),
    })?;

    let entry = match returned {
        Value::Table(exports) => exports.get::<Option<Function>>("update").ok().flatten(),
        Value::Function(update) => Some(update),
        _ => None,
    };
    let entry = match entry {
        Some(entry) => entry,
        None => env
            .get::<Option<Function>>("update")
            .ok()
            .flatten()
            .ok_or_else(|| LoadError::MissingEntryPoint(plugin.clone()))?,
    };

    tracing::debug!(plugin = %plugin, kind = %descriptor.kind, trust = %descriptor.trust, "plugin loaded");

    Ok(LoadedModule {
        plugin,
        kind: descriptor.kind,
        trust: descriptor.trust,
        env,
        entry,
        lua,
    })
}

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

impl LoadedModule {
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    pub fn trust(&self) -> TrustLevel {
        self.trust
    }

    /// Install the `ds` table. The setter is removed afterwards so scripts
    /// cannot repoint their own capability slot.
    pub fn install(&self, capabilities: Capabilities) -> mlua::Result<()> {
        let table = capabilities.into_table(&self.lua)?;
        let hook: Function = self.env.get(INSTALL_HOOK)?;
        hook.call::<()>(table)?;
        self.env.set(INSTALL_HOOK, Value::Nil)
    }

    /// Run `update(state, block)` and collect its render tree.
    pub async fn update(&self, snapshot: &Snapshot) -> Result<Rendered, ExecutionError> {
        let state = self.lua.to_value_with(snapshot.state(), serialize_options())?;
        let returned: Value = self.entry.call_async((state, snapshot.block())).await?;
        Ok(render::collect(&self.lua, returned)?)
    }

    /// Invoke a captured callback with submitted form values.
    pub async fn invoke(
        &self,
        callback: &Function,
        values: &serde_json::Value,
    ) -> Result<(), ExecutionError> {
        let values = self.lua.to_value_with(values, serialize_options())?;
        callback.call_async::<()>(values).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_imports_preserves_line_numbers() {
        let source = "local ds = require(\"downstream\")\nrequire 'util'\nlocal x = 1\nreturn x";
        let stripped = strip_imports(source);
        assert_eq!(stripped, "\n\nlocal x = 1\nreturn x");
    }

    #[test]
    fn test_strip_imports_is_conservative() {
        assert!(is_import("local a, b = require(\"x\")"));
        assert!(is_import("  require(\"x\")"));
        assert!(!is_import("local required = 3"));
        assert!(!is_import("local x = requirements"));
        assert!(!is_import("-- require(\"x\") in a comment"));
        assert!(!is_import("local requirex"));
    }

    #[test]
    fn test_wrap_keeps_first_line() {
        let wrapped = wrap("function update() end");
        assert!(wrapped.starts_with(PRELUDE));
        assert_eq!(wrapped.lines().count(), 1);
    }
}
