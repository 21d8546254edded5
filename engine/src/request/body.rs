//! Request body serialization per content type.
use crate::spec::value::scalar_to_string;
use rand::Rng;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
  Json,
  Xml,
  Form,
  Multipart,
}

impl BodyFormat {
  pub fn from_content_type(content_type: &str) -> Self {
    let essence = content_type
      .split(';')
      .next()
      .unwrap_or_default()
      .trim()
      .to_lowercase();
    match essence.as_str() {
      "application/xml" | "text/xml" => BodyFormat::Xml,
      "application/x-www-form-urlencoded" => BodyFormat::Form,
      "multipart/form-data" => BodyFormat::Multipart,
      s if s.ends_with("+xml") => BodyFormat::Xml,
      _ => BodyFormat::Json,
    }
  }
}

/// Serialize `value` for `content_type`. Returns the bytes and the
/// Content-Type header value to send, which for multipart carries the
/// generated boundary.
pub fn serialize_body(value: &Value, content_type: &str) -> (Vec<u8>, String) {
  match BodyFormat::from_content_type(content_type) {
    BodyFormat::Json => (
      serde_json::to_vec(value).unwrap_or_default(),
      content_type.to_string(),
    ),
    BodyFormat::Xml => (xml_from_value(value).into_bytes(), content_type.to_string()),
    BodyFormat::Form => (encode_form_body(value).into_bytes(), content_type.to_string()),
    BodyFormat::Multipart => {
      let boundary = multipart_boundary();
      (
        multipart_body(value, &boundary).into_bytes(),
        format!("multipart/form-data; boundary={}", boundary),
      )
    }
  }
}

fn escape_xml(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&apos;")
}

fn xml_element(out: &mut String, name: &str, value: &Value) {
  match value {
    Value::Array(items) => {
      for item in items {
        xml_element(out, name, item);
      }
    }
    Value::Object(map) => {
      out.push_str(&format!("<{}>", name));
      for (k, v) in map {
        xml_element(out, k, v);
      }
      out.push_str(&format!("</{}>", name));
    }
    scalar => out.push_str(&format!(
      "<{}>{}</{}>",
      name,
      escape_xml(&scalar_to_string(scalar)),
      name
    )),
  }
}

/// Element-per-property XML for an object; arrays repeat their element.
pub fn xml_from_object(map: &serde_json::Map<String, Value>) -> String {
  let mut out = String::from("<root>");
  for (k, v) in map {
    xml_element(&mut out, k, v);
  }
  out.push_str("</root>");
  out
}

pub fn xml_from_value(value: &Value) -> String {
  match value {
    Value::Object(map) => xml_from_object(map),
    Value::Array(items) => {
      let mut out = String::from("<items>");
      for item in items {
        xml_element(&mut out, "item", item);
      }
      out.push_str("</items>");
      out
    }
    scalar => {
      let mut out = String::new();
      xml_element(&mut out, "value", scalar);
      out
    }
  }
}

fn flat_pairs(value: &Value) -> Vec<(String, String)> {
  match value {
    Value::Object(map) => map
      .iter()
      .flat_map(|(k, v)| match v {
        Value::Array(items) => items
          .iter()
          .map(|item| (k.clone(), form_scalar(item)))
          .collect::<Vec<_>>(),
        other => vec![(k.clone(), form_scalar(other))],
      })
      .collect(),
    Value::Null => Vec::new(),
    other => vec![(String::from("value"), form_scalar(other))],
  }
}

fn form_scalar(value: &Value) -> String {
  match value {
    Value::Object(_) | Value::Array(_) => value.to_string(),
    other => scalar_to_string(other),
  }
}

pub fn encode_form_body(value: &Value) -> String {
  let mut serializer = url::form_urlencoded::Serializer::new(String::new());
  for (k, v) in flat_pairs(value) {
    serializer.append_pair(&k, &v);
  }
  serializer.finish()
}

pub fn multipart_boundary() -> String {
  let mut rng = rand::rng();
  let tail: String = (0..24)
    .map(|_| format!("{:x}", rng.random_range(0..16u8)))
    .collect();
  format!("----SwaggerWardBoundary{}", tail)
}

pub fn multipart_body(value: &Value, boundary: &str) -> String {
  let mut out = String::new();
  for (k, v) in flat_pairs(value) {
    out.push_str(&format!("--{}\r\n", boundary));
    out.push_str(&format!(
      "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
      k.replace('"', "%22")
    ));
    out.push_str(&v);
    out.push_str("\r\n");
  }
  out.push_str(&format!("--{}--\r\n", boundary));
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn xml_repeats_scalar_arrays() {
    let xml = xml_from_value(&json!({"name":"x","tags":["alpha","beta"]}));
    assert!(xml.contains("<tags>alpha</tags>"));
    assert!(xml.contains("<tags>beta</tags>"));
    assert!(xml.starts_with("<root>") && xml.ends_with("</root>"));
  }

  #[test]
  fn xml_wraps_top_level_arrays() {
    let xml = xml_from_value(&json!(["one", 2, true]));
    assert_eq!(xml, "<items><item>one</item><item>2</item><item>true</item></items>");
  }

  #[test]
  fn xml_escapes_text() {
    assert_eq!(xml_from_value(&json!({"q":"a<b&c"})), "<root><q>a&lt;b&amp;c</q></root>");
  }

  #[test]
  fn form_encoding_escapes_values() {
    let form = encode_form_body(&json!({"name":"John Doe","email":"a+b@example.com"}));
    assert!(form.contains("name=John+Doe"));
    assert!(form.contains("email=a%2Bb%40example.com"));
  }

  #[test]
  fn multipart_has_boundary_in_header_and_body() {
    let (bytes, header) = serialize_body(&json!({"file":"data","n":1}), "multipart/form-data");
    let boundary = header.split("boundary=").nth(1).unwrap().to_string();
    let body = String::from_utf8(bytes).unwrap();
    assert!(body.starts_with(&format!("--{}\r\n", boundary)));
    assert!(body.contains("name=\"file\"\r\n\r\ndata\r\n"));
    assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
  }

  #[test]
  fn format_selection() {
    assert_eq!(BodyFormat::from_content_type("application/json; charset=utf-8"), BodyFormat::Json);
    assert_eq!(BodyFormat::from_content_type("TEXT/XML"), BodyFormat::Xml);
    assert_eq!(BodyFormat::from_content_type("application/vnd.api+json"), BodyFormat::Json);
    assert_eq!(BodyFormat::from_content_type("application/octet-stream"), BodyFormat::Json);
  }
}
