pub mod body;
pub mod builder;
pub mod target;

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub use builder::{BuiltOperation, RequestBuilder};
pub use target::ServerTarget;

/// Ordered header list with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderSet(Vec<(String, String)>);

impl HeaderSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  /// Replace every header named `name` (any casing) with a single entry.
  pub fn set(&mut self, name: &str, value: &str) {
    self.remove(name);
    self.0.push((name.to_string(), value.to_string()));
  }

  pub fn insert_if_absent(&mut self, name: &str, value: &str) -> bool {
    if self.contains(name) {
      return false;
    }
    self.0.push((name.to_string(), value.to_string()));
    true
  }

  pub fn remove(&mut self, name: &str) {
    self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
  }

  pub fn set_content_type(&mut self, value: &str) {
    self.set("Content-Type", value);
  }

  pub fn count(&self, name: &str) -> usize {
    self
      .0
      .iter()
      .filter(|(k, _)| k.eq_ignore_ascii_case(name))
      .count()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl From<&BTreeMap<String, String>> for HeaderSet {
  fn from(map: &BTreeMap<String, String>) -> Self {
    let mut set = HeaderSet::new();
    for (k, v) in map {
      set.set(k, v);
    }
    set
  }
}

/// Split a `Key: Value` header line. Lines without a colon or with an empty
/// name are rejected.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
  let (key, value) = line.split_once(':')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  Some((key.to_string(), value.trim().to_string()))
}

fn shell_quote(s: &str) -> String {
  format!("'{}'", s.replace('\'', r"'\''"))
}

/// A fully synthesized request plus the pieces it was assembled from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestDescriptor {
  pub method: String,
  pub url: String,
  pub headers: HeaderSet,
  #[serde(skip)]
  pub body: Option<Vec<u8>>,
  pub content_type: Option<String>,
  pub path_template: String,
  pub path_params: BTreeMap<String, String>,
  pub query_params: BTreeMap<String, String>,
  pub body_value: Option<Value>,
}

impl RequestDescriptor {
  pub fn body_text(&self) -> Option<String> {
    self
      .body
      .as_ref()
      .map(|b| String::from_utf8_lossy(b).to_string())
  }

  /// Add `Key: Value` lines that are not already present.
  pub fn merge_headers(&mut self, lines: &[String]) {
    for line in lines {
      if let Some((k, v)) = parse_header_line(line) {
        self.headers.insert_if_absent(&k, &v);
      }
    }
  }

  pub fn to_curl(&self) -> String {
    let mut cmd = format!("curl -sk -X {} {}", self.method, shell_quote(&self.url));
    if let Some(body) = self.body_text() {
      cmd.push_str(&format!(" -d {}", shell_quote(&body)));
    }
    for (k, v) in self.headers.iter() {
      cmd.push_str(&format!(" -H {}", shell_quote(&format!("{}: {}", k, v))));
    }
    cmd
  }

  pub fn to_sqlmap(&self) -> String {
    let mut cmd = format!("sqlmap -u {}", shell_quote(&self.url));
    if !matches!(self.method.as_str(), "GET" | "POST") {
      cmd.push_str(&format!(" --method={}", self.method));
    }
    if let Some(body) = self.body_text() {
      cmd.push_str(&format!(" --data={}", shell_quote(&body)));
    }
    for (k, v) in self.headers.iter() {
      cmd.push_str(&format!(" -H {}", shell_quote(&format!("{}: {}", k, v))));
    }
    cmd
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_replaces_any_casing() {
    let mut headers = HeaderSet::new();
    headers.set("content-type", "text/plain");
    headers.set("CONTENT-TYPE", "text/xml");
    headers.set_content_type("multipart/form-data; boundary=abc123");
    assert_eq!(headers.count("Content-Type"), 1);
    assert_eq!(
      headers.get("content-type"),
      Some("multipart/form-data; boundary=abc123")
    );
    assert_eq!(headers.iter().next().map(|(k, _)| k), Some("Content-Type"));
  }

  #[test]
  fn content_type_stays_single_after_many_calls() {
    let mut headers = HeaderSet::new();
    headers.insert_if_absent("Accept", "*/*");
    for ct in ["a/b", "c/d", "e/f"] {
      headers.set_content_type(ct);
      assert_eq!(headers.count("content-type"), 1);
    }
    assert_eq!(headers.len(), 2);
  }

  #[test]
  fn header_lines() {
    assert_eq!(
      parse_header_line("Authorization: Bearer a:b"),
      Some(("Authorization".into(), "Bearer a:b".into()))
    );
    assert!(parse_header_line("novalue").is_none());
    assert!(parse_header_line(": x").is_none());
  }

  #[test]
  fn curl_quotes_single_quotes() {
    let mut d = RequestDescriptor {
      method: "POST".into(),
      url: "https://api.example.com/v1/users".into(),
      body: Some(br#"{"name":"O'Brien"}"#.to_vec()),
      ..Default::default()
    };
    d.headers.set_content_type("application/json");
    let curl = d.to_curl();
    assert_eq!(
      curl,
      r#"curl -sk -X POST 'https://api.example.com/v1/users' -d '{"name":"O'\''Brien"}' -H 'Content-Type: application/json'"#
    );
    assert!(!curl.contains("'\""));
    let sqlmap = d.to_sqlmap();
    assert!(sqlmap.starts_with("sqlmap -u 'https://api.example.com/v1/users' --data="));
  }
}
