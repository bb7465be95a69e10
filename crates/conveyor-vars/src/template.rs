//! `((var))` interpolation over JSON values.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{VarsError, VarsResult};
use crate::reference::Reference;
use crate::variables::Variables;

lazy_static! {
    /// `((source:path.field))`; quoted segments may contain '.' and ':'.
    static ref VAR_PATTERN: Regex = Regex::new(r#"\(\(([-/.:@"\w\p{L}]+)\)\)"#).unwrap();
}

/// Replace every `((reference))` in `value` with its resolved variable.
///
/// A string consisting of exactly one reference is replaced by the variable's
/// value as-is (which may be a mapping or number); references embedded in
/// longer strings are rendered as text. Mapping keys are interpolated too.
/// All undefined references are reported together.
pub fn interpolate(value: &Value, vars: &dyn Variables) -> VarsResult<Value> {
    let mut undefined = Vec::new();
    let out = interpolate_value(value, vars, &mut undefined)?;
    if undefined.is_empty() {
        Ok(out)
    } else {
        undefined.sort();
        undefined.dedup();
        Err(VarsError::Undefined { names: undefined })
    }
}

/// Interpolate each value of a string-keyed mapping.
pub fn interpolate_map(map: &Map<String, Value>, vars: &dyn Variables) -> VarsResult<Map<String, Value>> {
    match interpolate(&Value::Object(map.clone()), vars)? {
        Value::Object(out) => Ok(out),
        _ => Ok(Map::new()),
    }
}

fn interpolate_value(
    value: &Value,
    vars: &dyn Variables,
    undefined: &mut Vec<String>,
) -> VarsResult<Value> {
    match value {
        Value::String(s) => interpolate_str(s, vars, undefined),
        Value::Array(items) => items
            .iter()
            .map(|item| interpolate_value(item, vars, undefined))
            .collect::<VarsResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                let key = match interpolate_str(key, vars, undefined)? {
                    Value::String(k) => k,
                    other => other.to_string(),
                };
                out.insert(key, interpolate_value(child, vars, undefined)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn interpolate_str(s: &str, vars: &dyn Variables, undefined: &mut Vec<String>) -> VarsResult<Value> {
    let captures: Vec<_> = VAR_PATTERN.captures_iter(s).collect();
    if captures.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    // whole-string reference keeps the value's type
    if captures.len() == 1 && captures[0].get(0).map(|m| m.as_str()) == Some(s) {
        let reference = Reference::parse(&captures[0][1])?;
        return match vars.get(&reference)? {
            Some(v) => Ok(v),
            None => {
                undefined.push(reference.to_string());
                Ok(Value::String(s.to_string()))
            }
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for cap in &captures {
        let whole = match cap.get(0) {
            Some(m) => m,
            None => continue,
        };
        out.push_str(&s[last..whole.start()]);
        let reference = Reference::parse(&cap[1])?;
        match vars.get(&reference)? {
            Some(Value::String(v)) => out.push_str(&v),
            Some(v) => out.push_str(&v.to_string()),
            None => {
                undefined.push(reference.to_string());
                out.push_str(whole.as_str());
            }
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::StaticVariables;
    use serde_json::json;

    fn vars() -> StaticVariables {
        StaticVariables::new()
            .with("source-var", "super-secret-source")
            .with("num", 42)
            .with("doc", json!({"user": "admin"}))
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let out = interpolate(&json!({"n": "((num))", "d": "((doc))"}), &vars()).unwrap();
        assert_eq!(out, json!({"n": 42, "d": {"user": "admin"}}));
    }

    #[test]
    fn test_embedded_references_render_as_text() {
        let out = interpolate(&json!("user=((doc.user)) n=((num))"), &vars()).unwrap();
        assert_eq!(out, json!("user=admin n=42"));
    }

    #[test]
    fn test_nested_structures_and_keys() {
        let out = interpolate(
            &json!({"some": ["((source-var))"], "((doc.user))": true}),
            &vars(),
        )
        .unwrap();
        assert_eq!(
            out,
            json!({"some": ["super-secret-source"], "admin": true})
        );
    }

    #[test]
    fn test_undefined_vars_are_reported_together() {
        let err = interpolate(&json!({"a": "((missing-b))", "b": "x ((missing-a))"}), &vars())
            .unwrap_err();
        assert_eq!(
            err,
            VarsError::Undefined {
                names: vec!["missing-a".to_string(), "missing-b".to_string()]
            }
        );
    }

    #[test]
    fn test_plain_values_pass_through() {
        let v = json!({"a": 1, "b": null, "c": "no vars here"});
        assert_eq!(interpolate(&v, &vars()).unwrap(), v);
    }
}
