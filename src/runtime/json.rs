//! JSON conversion of template values.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::value::{Key, Value};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_unit(),
            Value::Str(s) | Value::Symbol(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Hash(map) => {
                let map = map.borrow();
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map.iter() {
                    out.serialize_entry(&key_text(key), value)?;
                }
                out.end()
            }
            Value::Range { start, end, exclusive } => {
                let end = if *exclusive { *end } else { end.saturating_add(1) };
                serializer.collect_seq(*start..end)
            }
            Value::Proc(_) | Value::Template(_) => serializer.serialize_str(&self.inspect()),
        }
    }
}

fn key_text(key: &Key) -> String {
    match key {
        Key::Str(s) | Key::Symbol(s) => s.to_string(),
        other => other.to_value().to_s(),
    }
}

/// Converts a value into a JSON document node.
pub(crate) fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_converts_nested_values() {
        let value = Value::hash([
            (Key::symbol("name"), Value::from("x")),
            (Key::from("tags"), Value::array(vec![Value::symbol("a"), Value::Nil])),
            (Key::Int(1), Value::Float(1.5)),
        ]);
        assert_eq!(
            to_json(&value),
            json!({"name": "x", "tags": ["a", null], "1": 1.5})
        );
    }

    #[test]
    fn test_ranges_become_arrays() {
        let range = Value::Range {
            start: 1,
            end: 3,
            exclusive: false,
        };
        assert_eq!(to_json(&range), json!([1, 2, 3]));
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        assert_eq!(to_json(&Value::Float(f64::NAN)), json!(null));
    }
}
