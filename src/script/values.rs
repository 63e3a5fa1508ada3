//! Script-side value types and conversions

use crate::config::Task;
use rhai::{Array, Dynamic, Map};
use std::fmt;
use std::rc::Rc;

/// A resolved filesystem path, shown to scripts as type `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPath(pub String);

impl fmt::Display for ScriptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A declared task, returned by `task()` so it can be embedded in `cmds`
#[derive(Debug, Clone)]
pub struct TaskHandle(pub Rc<Task>);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Read a string or path argument
pub fn path_or_string(value: &Dynamic) -> Option<String> {
    if let Some(path) = value.clone().try_cast::<ScriptPath>() {
        return Some(path.0);
    }
    value.clone().into_string().ok()
}

/// Read a list of strings (or paths) stored under `field`
pub fn string_list(value: &Dynamic, field: &str) -> Result<Vec<String>, String> {
    let items = value
        .clone()
        .try_cast::<Array>()
        .ok_or_else(|| format!("{} must be a list, found {}", field, value.type_name()))?;

    items
        .iter()
        .map(|item| {
            path_or_string(item).ok_or_else(|| {
                format!(
                    "expected all items in {} to be strings but found {}",
                    field,
                    item.type_name()
                )
            })
        })
        .collect()
}

/// Convert parsed JSON into script values
pub fn json_to_dynamic(value: serde_json::Value) -> Dynamic {
    use serde_json::Value;
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Dynamic::from(i),
            (None, Some(f)) => Dynamic::from(f),
            (None, None) => Dynamic::from(n.to_string()),
        },
        Value::String(s) => Dynamic::from(s),
        Value::Array(items) => {
            let array: Array = items.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(array)
        }
        Value::Object(entries) => {
            let map: Map = entries
                .into_iter()
                .map(|(k, v)| (k.into(), json_to_dynamic(v)))
                .collect();
            Dynamic::from(map)
        }
    }
}

/// Convert a YAML scalar into a script value. Mappings and sequences are not
/// returned to scripts.
pub fn yaml_scalar(value: &serde_yaml::Value) -> Option<Dynamic> {
    use serde_yaml::Value;
    match value {
        Value::String(s) => Some(Dynamic::from(s.clone())),
        Value::Bool(b) => Some(Dynamic::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Some(Dynamic::from(i)),
            (None, Some(f)) => Some(Dynamic::from(f)),
            (None, None) => None,
        },
        _ => None,
    }
}

/// Walk a dotted key such as `a.b.0.c` through a YAML document.
///
/// Returns `Ok(None)` when a segment is missing and an error when the walk
/// reaches a scalar before the key is exhausted.
pub fn yaml_lookup<'a>(
    doc: &'a serde_yaml::Value,
    key: &str,
) -> Result<Option<&'a serde_yaml::Value>, String> {
    use serde_yaml::Value;
    let mut current = doc;

    for segment in key.split('.') {
        current = match current {
            Value::Mapping(map) => match map.get(segment) {
                Some(next) => next,
                None => return Ok(None),
            },
            Value::Sequence(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => next,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            Value::Tagged(tagged) => &tagged.value,
            other => {
                return Err(format!(
                    "encountered unexpected value {:?} while looking up {}",
                    other, key
                ))
            }
        };
    }

    match current {
        serde_yaml::Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_accepts_strings_and_paths() {
        let array: Array = vec![
            Dynamic::from("a.c".to_string()),
            Dynamic::from(ScriptPath("/x/b.c".to_string())),
        ];
        let list = string_list(&Dynamic::from(array), "inputs").unwrap();
        assert_eq!(list, vec!["a.c", "/x/b.c"]);
    }

    #[test]
    fn test_string_list_rejects_other_items() {
        let array: Array = vec![Dynamic::from(42_i64)];
        let err = string_list(&Dynamic::from(array), "deps").unwrap_err();
        assert!(err.contains("deps"));

        let err = string_list(&Dynamic::from("x".to_string()), "deps").unwrap_err();
        assert!(err.contains("must be a list"));
    }

    #[test]
    fn test_json_conversion() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"name": "x", "list": [1, true, null]}"#).unwrap();
        let map = json_to_dynamic(value).try_cast::<Map>().unwrap();
        assert_eq!(map["name"].clone().into_string().unwrap(), "x");
        let list = map["list"].clone().try_cast::<Array>().unwrap();
        assert_eq!(list[0].as_int().unwrap(), 1);
        assert!(list[1].as_bool().unwrap());
        assert!(list[2].is_unit());
    }

    #[test]
    fn test_yaml_lookup() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str("a:\n  b:\n    - c: 5\n    - c: hello\n").unwrap();

        let found = yaml_lookup(&doc, "a.b.1.c").unwrap().unwrap();
        assert_eq!(found.as_str(), Some("hello"));
        assert!(yaml_lookup(&doc, "a.b.7.c").unwrap().is_none());
        assert!(yaml_lookup(&doc, "a.x").unwrap().is_none());
        assert!(yaml_lookup(&doc, "a.b.0.c.d").is_err());
        assert!(yaml_scalar(yaml_lookup(&doc, "a.b").unwrap().unwrap()).is_none());
    }
}
