/// Lua script runtime built on mlua
///
/// Every evaluation gets a fresh interpreter with only the table, string,
/// math and utf8 libraries. Dangerous base functions are removed and `_G`
/// rejects unknown names, so anything outside the injected bindings fails as
/// an undefined identifier. An instruction-count hook polls the interrupt
/// flag raised by the timeout timer.

use crate::sandbox::normalize::{split_location, CHUNK_NAME};
use crate::sandbox::{InterruptHandle, RunMode, ScriptBindings, ScriptRuntime, SandboxError};
use crate::value::number_from_f64;
use mlua::{HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, VmState};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Instructions between two interrupt-flag checks
const HOOK_INSTRUCTION_INTERVAL: u32 = 1000;

/// Guard against self-referencing tables when converting results
const MAX_CONVERSION_DEPTH: usize = 64;

/// Integer-keyed tables up to this index are always arrays
const SPARSE_ARRAY_SAFE: i64 = 10;

/// Beyond the safe index, at most this many slots per present entry
const SPARSE_ARRAY_RATIO: usize = 2;

/// Base functions removed before user code runs
const BLOCKED_GLOBALS: &[&str] = &[
    "collectgarbage",
    "dofile",
    "getmetatable",
    "load",
    "loadfile",
    "loadstring",
    "print",
    "pcall",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "require",
    "setmetatable",
    "xpcall",
];

/// Builds the accessor objects and locks the global table
const PRELUDE: &str = r#"
local input_items = __input_items
local node_outputs = __node_outputs
local position = __item_position

local function accessor(items)
  return {
    item = items[position],
    all = function() return items end,
    first = function() return items[1] end,
    last = function() return items[#items] end,
  }
end

function __node(name)
  local items = node_outputs[name]
  if items == nil then
    error("Referenced node '" .. tostring(name) .. "' has not been executed", 2)
  end
  return accessor(items)
end

__input = accessor(input_items)
__items = input_items
__item = input_items[position] or {}
__json = __item.json or {}
__binary = __item.binary or {}

__input_items = nil
__node_outputs = nil
__item_position = nil

setmetatable(_G, {
  __index = function(_, key)
    error("'" .. tostring(key) .. "' is not defined", 2)
  end,
})
"#;

#[derive(Default)]
pub struct LuaRuntime {
    lua: Option<Lua>,
    interrupt: InterruptHandle,
    /// Line the hook observed when it raised the interrupt
    interrupted_line: Arc<AtomicU32>,
}

impl LuaRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lua(&self) -> Result<&Lua, SandboxError> {
        self.lua
            .as_ref()
            .ok_or_else(|| SandboxError::Setup("Lua runtime used before initialize".to_string()))
    }

    /// Map an interpreter error onto the sandbox error taxonomy
    fn script_error(&self, error: mlua::Error) -> SandboxError {
        if self.interrupt.is_interrupted() {
            return SandboxError::Interrupted {
                line: self.interrupted_line.load(Ordering::SeqCst).max(1),
            };
        }
        let context = error.to_string();
        let (message, line) = split_location(&root_message(&error), &context);
        SandboxError::Script { message, line }
    }
}

impl ScriptRuntime for LuaRuntime {
    fn initialize(&mut self) -> Result<(), SandboxError> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
        .map_err(|e| SandboxError::Setup(e.to_string()))?;

        let flag = self.interrupt.clone();
        let line = Arc::clone(&self.interrupted_line);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_, debug| {
                if flag.is_interrupted() {
                    let current = u32::try_from(debug.curr_line()).unwrap_or(1);
                    line.store(current, Ordering::SeqCst);
                    return Err(mlua::Error::RuntimeError(
                        "script execution interrupted".to_string(),
                    ));
                }
                Ok(VmState::Continue)
            },
        );

        self.lua = Some(lua);
        Ok(())
    }

    fn inject(&mut self, bindings: &ScriptBindings<'_>) -> Result<(), SandboxError> {
        let lua = self.lua()?;
        inject_bindings(lua, bindings).map_err(|e| SandboxError::Setup(e.to_string()))
    }

    fn run(&mut self, code: &str, mode: RunMode) -> Result<Value, SandboxError> {
        let lua = self.lua()?;
        let source = rewrite_bindings(code);

        let function = match mode {
            // A lone expression becomes the result without an explicit return
            RunMode::Expression => {
                let wrapped = format!("return {source}");
                match lua.load(wrapped.as_str()).set_name(CHUNK_NAME).into_function() {
                    Ok(function) => function,
                    Err(_) => lua
                        .load(source.as_str())
                        .set_name(CHUNK_NAME)
                        .into_function()
                        .map_err(|e| self.script_error(e))?,
                }
            }
            RunMode::Statements => lua
                .load(source.as_str())
                .set_name(CHUNK_NAME)
                .into_function()
                .map_err(|e| self.script_error(e))?,
        };

        let result: mlua::Value = function.call(()).map_err(|e| self.script_error(e))?;
        let array_marker = lua.array_metatable();
        let converted = lua_to_json(&result, &array_marker, 0).map_err(|e| self.script_error(e))?;
        Ok(converted.unwrap_or(Value::Null))
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

fn inject_bindings(lua: &Lua, bindings: &ScriptBindings<'_>) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set("__input_items", lua.to_value(bindings.items)?)?;
    let outputs = lua.create_table()?;
    for (name, items) in &bindings.node_outputs {
        outputs.set(name.as_str(), lua.to_value(items)?)?;
    }
    globals.set("__node_outputs", outputs)?;
    globals.set("__item_position", bindings.item_index + 1)?;
    globals.set("null", lua.null())?;

    for (name, value) in &bindings.variables {
        globals.set(format!("__{name}"), lua.to_value(value)?)?;
    }

    for (name, helper) in bindings.helpers.iter() {
        let helper = Arc::clone(helper);
        let function = lua.create_function(move |lua, args: mlua::Variadic<mlua::Value>| {
            let marker = lua.array_metatable();
            let mut values = Vec::with_capacity(args.len());
            for arg in args.iter() {
                values.push(lua_to_json(arg, &marker, 0)?.unwrap_or(Value::Null));
            }
            let result = helper(&values).map_err(mlua::Error::RuntimeError)?;
            lua.to_value(&result)
        })?;
        globals.set(format!("__{name}"), function)?;
    }

    lua.load(PRELUDE).set_name("=prelude").exec()?;

    for name in BLOCKED_GLOBALS {
        globals.raw_set(*name, mlua::Nil)?;
    }
    Ok(())
}

/// Innermost message of an interpreter error
fn root_message(error: &mlua::Error) -> String {
    match error {
        mlua::Error::CallbackError { cause, .. } => root_message(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Convert a Lua value into JSON
///
/// Returns `None` for values with no JSON form (nil, functions, threads,
/// userdata); containers drop such entries at any depth. The serde null
/// sentinel maps to an explicit JSON null.
fn lua_to_json(
    value: &mlua::Value,
    array_marker: &mlua::Table,
    depth: usize,
) -> mlua::Result<Option<Value>> {
    match value {
        mlua::Value::Nil => Ok(None),
        mlua::Value::Boolean(b) => Ok(Some(Value::Bool(*b))),
        mlua::Value::Integer(i) => Ok(Some(Value::Number(serde_json::Number::from(*i)))),
        mlua::Value::Number(f) => Ok(Some(number_from_f64(*f))),
        mlua::Value::String(s) => Ok(Some(Value::String(s.to_str()?.to_string()))),
        mlua::Value::LightUserData(ud) if ud.0.is_null() => Ok(Some(Value::Null)),
        mlua::Value::Table(table) => table_to_json(table, array_marker, depth).map(Some),
        _ => Ok(None),
    }
}

fn table_to_json(
    table: &mlua::Table,
    array_marker: &mlua::Table,
    depth: usize,
) -> mlua::Result<Value> {
    if depth > MAX_CONVERSION_DEPTH {
        return Err(mlua::Error::RuntimeError(
            "returned value is nested too deeply (cyclic table?)".to_string(),
        ));
    }

    let mut pairs = Vec::new();
    for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
        pairs.push(pair?);
    }

    if pairs.is_empty() {
        let marked_array = table
            .metatable()
            .map(|mt| mt == *array_marker)
            .unwrap_or(false);
        return Ok(if marked_array {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        });
    }

    // Positive integer keys form an array; `nil` holes are dropped unless
    // the table is too sparse to be a sequence
    let len = pairs.len();
    let mut max_index = 0i64;
    let integer_keys = pairs.iter().all(|(key, _)| match key {
        mlua::Value::Integer(i) if *i >= 1 => {
            max_index = max_index.max(*i);
            true
        }
        _ => false,
    });
    let is_sequence = integer_keys
        && (max_index <= SPARSE_ARRAY_SAFE || max_index as usize <= len * SPARSE_ARRAY_RATIO);

    if is_sequence {
        pairs.sort_by_key(|(key, _)| match key {
            mlua::Value::Integer(i) => *i,
            _ => 0,
        });
        let mut array = Vec::with_capacity(len);
        for (_, entry) in &pairs {
            if let Some(converted) = lua_to_json(entry, array_marker, depth + 1)? {
                array.push(converted);
            }
        }
        return Ok(Value::Array(array));
    }

    let mut object = Map::new();
    for (key, entry) in &pairs {
        let key = match key {
            mlua::Value::String(s) => s.to_str()?.to_string(),
            mlua::Value::Integer(i) => i.to_string(),
            mlua::Value::Number(f) => f.to_string(),
            _ => continue,
        };
        if let Some(converted) = lua_to_json(entry, array_marker, depth + 1)? {
            object.insert(key, converted);
        }
    }
    Ok(Value::Object(object))
}

/// Rewrite `$name` to `__name` and `$(` to `__node(` outside strings and comments
pub(crate) fn rewrite_bindings(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '"' | '\'' => {
                let end = skip_short_string(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if next == Some('-') => {
                let end = match long_bracket(&chars, i + 2) {
                    Some(level) => skip_long_bracket(&chars, i + 2, level),
                    None => chars[i..]
                        .iter()
                        .position(|ch| *ch == '\n')
                        .map_or(chars.len(), |offset| i + offset),
                };
                out.extend(&chars[i..end]);
                i = end;
            }
            '[' if long_bracket(&chars, i).is_some() => {
                let level = long_bracket(&chars, i).unwrap_or(0);
                let end = skip_long_bracket(&chars, i, level);
                out.extend(&chars[i..end]);
                i = end;
            }
            '$' => {
                match next {
                    Some('(') => out.push_str("__node"),
                    Some(n) if n.is_ascii_alphabetic() || n == '_' => out.push_str("__"),
                    _ => out.push('$'),
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// End index (exclusive) of a quoted string starting at `start`
fn skip_short_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            '\n' => return j + 1,
            ch if ch == quote => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Level of a long bracket opener (`[[`, `[==[`) at `start`
fn long_bracket(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start) != Some(&'[') {
        return None;
    }
    let level = chars[start + 1..].iter().take_while(|ch| **ch == '=').count();
    (chars.get(start + 1 + level) == Some(&'[')).then_some(level)
}

fn skip_long_bracket(chars: &[char], start: usize, level: usize) -> usize {
    let mut j = start + level + 2;
    while j < chars.len() {
        if chars[j] == ']'
            && chars[j + 1..].iter().take(level).all(|ch| *ch == '=')
            && chars.get(j + 1 + level) == Some(&']')
        {
            return j + level + 2;
        }
        j += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_bindings_outside_literals() {
        assert_eq!(rewrite_bindings("$json.name"), "__json.name");
        assert_eq!(rewrite_bindings("$('Set').item.json"), "__node('Set').item.json");
        assert_eq!(rewrite_bindings("$if(a, 1, 2)"), "__if(a, 1, 2)");
        assert_eq!(rewrite_bindings("'$json' .. \"$x\""), "'$json' .. \"$x\"");
        assert_eq!(rewrite_bindings("1 -- $json\n+ $x"), "1 -- $json\n+ __x");
        assert_eq!(rewrite_bindings("[[ $a ]] .. $b"), "[[ $a ]] .. __b");
        assert_eq!(rewrite_bindings("cost $ 5"), "cost $ 5");
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        assert_eq!(rewrite_bindings(r#""a\"$b" .. $c"#), r#""a\"$b" .. __c"#);
    }
}
