//! Lua ↔ JSON conversion for plugin state and actions.
//!
//! Tables are encoded as:
//! - a JSON array when their keys are exactly `1..n`
//! - a JSON object when every key is a string
//! - `{"dataType": "Map", "value": [[k, v], ...]}` otherwise
//!
//! Decoding recognizes the `Map` shape and rebuilds the association, so
//! state keyed by numbers, booleans or tables survives a round trip.

use mlua::{Lua, Table, Value};

/// Marker value of the `dataType` field.
pub const MAP_DATA_TYPE: &str = "Map";

/// Tables nested deeper than this are rejected (cycles end up here too).
const MAX_DEPTH: usize = 128;

/// Convert a Lua value to JSON.
///
/// Functions, threads and userdata have no JSON form and fail.
pub fn lua_to_json(value: &Value) -> mlua::Result<serde_json::Value> {
    encode(value, 0)
}

fn encode(value: &Value, depth: usize) -> mlua::Result<serde_json::Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::external("state nested too deeply (cycle?)"));
    }

    Ok(match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy()),
        Value::Table(table) => encode_table(table, depth)?,
        Value::LightUserData(ud) if ud.0.is_null() => serde_json::Value::Null,
        other => {
            return Err(mlua::Error::external(format!(
                "cannot serialize a Lua {}",
                other.type_name()
            )))
        }
    })
}

fn encode_table(table: &Table, depth: usize) -> mlua::Result<serde_json::Value> {
    let mut entries = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        entries.push(pair?);
    }

    if entries.is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    let len = entries.len();
    let is_sequence = entries.iter().all(|(key, _)| match key {
        Value::Integer(i) => *i >= 1 && usize::try_from(*i).is_ok_and(|i| i <= len),
        _ => false,
    });
    if is_sequence {
        let mut items = vec![serde_json::Value::Null; len];
        for (key, value) in &entries {
            if let Value::Integer(i) = key {
                items[(*i as usize) - 1] = encode(value, depth + 1)?;
            }
        }
        return Ok(serde_json::Value::Array(items));
    }

    if entries.iter().all(|(key, _)| matches!(key, Value::String(_))) {
        let mut object = serde_json::Map::new();
        for (key, value) in &entries {
            if let Value::String(key) = key {
                object.insert(key.to_string_lossy(), encode(value, depth + 1)?);
            }
        }
        return Ok(serde_json::Value::Object(object));
    }

    let mut pairs = Vec::with_capacity(len);
    for (key, value) in &entries {
        pairs.push(serde_json::Value::Array(vec![
            encode(key, depth + 1)?,
            encode(value, depth + 1)?,
        ]));
    }
    Ok(serde_json::json!({
        "dataType": MAP_DATA_TYPE,
        "value": pairs,
    }))
}

/// Convert JSON to a Lua value, mapping `null` to `nil`.
///
/// `{"dataType": "Map", "value": [[k, v], ...]}` becomes a table keyed by
/// the decoded `k`s.
pub fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Number(f))
            } else {
                Ok(Value::Nil)
            }
        }
        serde_json::Value::String(s) => lua.create_string(s).map(Value::String),
        serde_json::Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        serde_json::Value::Object(map) => {
            if let Some(pairs) = map_pairs(map) {
                let table = lua.create_table()?;
                for (key, value) in pairs {
                    let key = json_to_lua(lua, key)?;
                    if !key.is_nil() {
                        table.raw_set(key, json_to_lua(lua, value)?)?;
                    }
                }
                return Ok(Value::Table(table));
            }

            let table = lua.create_table()?;
            for (key, value) in map {
                // null members become absent keys
                if !value.is_null() {
                    table.raw_set(lua.create_string(key)?, json_to_lua(lua, value)?)?;
                }
            }
            Ok(Value::Table(table))
        }
    }
}

/// `[[k, v], ...]` of a `Map`-encoded object.
fn map_pairs(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Option<Vec<(&serde_json::Value, &serde_json::Value)>> {
    if map.len() != 2 || map.get("dataType")?.as_str()? != MAP_DATA_TYPE {
        return None;
    }
    map.get("value")?
        .as_array()?
        .iter()
        .map(|pair| match pair.as_array()?.as_slice() {
            [key, value] => Some((key, value)),
            _ => None,
        })
        .collect()
}
