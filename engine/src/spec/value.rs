//! Total accessors over untyped definition documents.
//!
//! Every accessor degrades to `None` on a missing or mistyped key instead of
//! failing, so callers can walk arbitrary documents without guarding each step.
use serde_json::{Map, Value};

pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
  value.as_object().and_then(|m| m.get(key))
}

pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
  get(value, key).and_then(Value::as_str)
}

pub fn get_map<'a>(value: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
  get(value, key).and_then(Value::as_object)
}

pub fn get_array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
  get(value, key)
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or_default()
}

pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
  get(value, key).and_then(Value::as_bool)
}

/// Render a scalar the way it would appear in a URL or header: strings
/// unquoted, `null` empty, everything else as compact JSON.
pub fn scalar_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// YAML documents may carry non-string keys (`200:` in responses), which
/// `serde_json::Value` cannot hold, so convert through `serde_yaml::Value`.
pub fn yaml_to_json(value: serde_yaml::Value) -> Value {
  match value {
    serde_yaml::Value::Null => Value::Null,
    serde_yaml::Value::Bool(b) => Value::Bool(b),
    serde_yaml::Value::Number(n) => {
      if let Some(i) = n.as_i64() {
        Value::from(i)
      } else if let Some(u) = n.as_u64() {
        Value::from(u)
      } else {
        n.as_f64()
          .and_then(serde_json::Number::from_f64)
          .map(Value::Number)
          .unwrap_or(Value::Null)
      }
    }
    serde_yaml::Value::String(s) => Value::String(s),
    serde_yaml::Value::Sequence(seq) => Value::Array(seq.into_iter().map(yaml_to_json).collect()),
    serde_yaml::Value::Mapping(mapping) => {
      let mut map = Map::new();
      for (k, v) in mapping {
        let key = match k {
          serde_yaml::Value::String(s) => s,
          other => scalar_to_string(&yaml_to_json(other)),
        };
        map.insert(key, yaml_to_json(v));
      }
      Value::Object(map)
    }
    serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
  }
}

/// Parse JSON first, then YAML.
pub fn parse_document(bytes: &[u8]) -> crate::error::Result<Value> {
  match serde_json::from_slice::<Value>(bytes) {
    Ok(v) => Ok(v),
    Err(_) => {
      let yaml: serde_yaml::Value = serde_yaml::from_slice(bytes)?;
      Ok(yaml_to_json(yaml))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn accessors_degrade_to_none() {
    let v = json!({"a": {"b": 1}, "s": "x", "list": [1, 2]});
    assert_eq!(get_str(&v, "s"), Some("x"));
    assert_eq!(get_str(&v, "a"), None);
    assert!(get_map(&v, "s").is_none());
    assert_eq!(get_array(&v, "list").len(), 2);
    assert!(get_array(&v, "missing").is_empty());
    assert!(get(&json!("scalar"), "a").is_none());
  }

  #[test]
  fn yaml_integer_keys_become_strings() {
    let doc = parse_document(b"responses:\n  200:\n    description: ok\n").unwrap();
    assert_eq!(
      doc.pointer("/responses/200/description"),
      Some(&json!("ok"))
    );
  }

  #[test]
  fn scalar_rendering() {
    assert_eq!(scalar_to_string(&json!("a b")), "a b");
    assert_eq!(scalar_to_string(&json!(3)), "3");
    assert_eq!(scalar_to_string(&json!(true)), "true");
    assert_eq!(scalar_to_string(&Value::Null), "");
  }
}
